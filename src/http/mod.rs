pub mod client;
pub mod server;

use bytes::Bytes;
use http::Uri;
use http_body_util::combinators::UnsyncBoxBody;

use crate::error::BoxError;

pub use client::{HttpRoundTrip, HyperTransport, StatsTransport};
pub use server::{Hijack, StatsLayer, StatsService};

/// Body type exchanged by [`HttpRoundTrip`] implementations.
pub type BoxBody = UnsyncBoxBody<Bytes, BoxError>;

/// `host:port` of the peer a request is aimed at, with the port defaulted
/// from the scheme.
pub fn upstream_of(uri: &Uri) -> Option<String> {
    let host = uri.host()?;
    let port = uri.port_u16().unwrap_or(match uri.scheme_str() {
        Some("https") => 443,
        _ => 80,
    });
    Some(format!("{host}:{port}"))
}

/// Wraps anything convertible to [`Bytes`] into a [`BoxBody`].
pub fn full(chunk: impl Into<Bytes>) -> BoxBody {
    use http_body_util::BodyExt;
    http_body_util::Full::new(chunk.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}

/// A body with no data frames.
pub fn empty() -> BoxBody {
    use http_body_util::BodyExt;
    http_body_util::Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed_unsync()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_defaults_port_from_scheme() {
        let uri: Uri = "http://example.com/path".parse().unwrap();
        assert_eq!(upstream_of(&uri).as_deref(), Some("example.com:80"));

        let uri: Uri = "https://api.github.com/users".parse().unwrap();
        assert_eq!(upstream_of(&uri).as_deref(), Some("api.github.com:443"));

        let uri: Uri = "http://10.0.0.1:8080/".parse().unwrap();
        assert_eq!(upstream_of(&uri).as_deref(), Some("10.0.0.1:8080"));

        let uri: Uri = "/relative".parse().unwrap();
        assert_eq!(upstream_of(&uri), None);
    }
}
