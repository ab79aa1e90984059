use std::collections::HashMap;
use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::{RedisError, Value};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{KvRequest, KvResponse, KvRoundTrip};
use crate::error::{Operation, TransportError};

/// Opens a `ConnectionManager` that auto-reconnects on failure.
///
/// Clones share one multiplexed connection.
pub async fn connect(url: &str) -> Result<ConnectionManager, TransportError> {
    let client = redis::Client::open(url)
        .map_err(|e| TransportError::network(Operation::Write, io::Error::new(io::ErrorKind::InvalidInput, e)))?;

    let conn = ConnectionManager::new(client)
        .await
        .map_err(|e| TransportError::network(Operation::Write, io::Error::new(io::ErrorKind::Other, e)))?;

    info!(url, "connected to redis");
    Ok(conn)
}

/// [`KvRoundTrip`] backed by one lazily opened connection per upstream.
#[derive(Default)]
pub struct RedisTransport {
    conns: Mutex<HashMap<String, ConnectionManager>>,
}

impl RedisTransport {
    pub fn new() -> Self {
        Self::default()
    }

    async fn connection(&self, upstream: &str) -> Result<ConnectionManager, TransportError> {
        let mut conns = self.conns.lock().await;
        if let Some(conn) = conns.get(upstream) {
            return Ok(conn.clone());
        }

        let conn = connect(&format!("redis://{upstream}/")).await?;
        conns.insert(upstream.to_owned(), conn.clone());
        Ok(conn)
    }
}

#[async_trait]
impl KvRoundTrip for RedisTransport {
    async fn round_trip(&self, mut req: KvRequest) -> Result<KvResponse, TransportError> {
        let mut cmd = redis::cmd(&req.command);
        if let Some(mut args) = req.args.take() {
            while let Some(arg) = args.next().await {
                cmd.arg(&arg?[..]);
            }
        }

        let mut conn = self.connection(&req.upstream).await?;
        let value: Value = cmd.query_async(&mut conn).await.map_err(classify)?;
        debug!(upstream = %req.upstream, command = %req.command, "redis reply received");

        let mut chunks = Vec::new();
        flatten(value, &mut chunks);
        Ok(KvResponse::new(req.upstream, chunks))
    }
}

/// Maps a client error onto the transport taxonomy.
///
/// The redis client does not say which half of the exchange failed; a
/// refused connection never wrote anything, every other I/O failure is
/// attributed to reading the reply.
fn classify(err: RedisError) -> TransportError {
    if err.is_connection_refusal() {
        TransportError::network(Operation::Write, io::Error::new(io::ErrorKind::ConnectionRefused, err))
    } else if err.is_io_error() || err.is_timeout() || err.is_connection_dropped() {
        TransportError::network(Operation::Read, io::Error::new(io::ErrorKind::Other, err))
    } else {
        TransportError::Response(err.to_string())
    }
}

fn flatten(value: Value, out: &mut Vec<Bytes>) {
    match value {
        Value::Nil => out.push(Bytes::new()),
        Value::Int(i) => out.push(Bytes::from(i.to_string())),
        Value::Data(data) => out.push(Bytes::from(data)),
        Value::Bulk(items) => {
            for item in items {
                flatten(item, out);
            }
        }
        Value::Status(status) => out.push(Bytes::from(status)),
        Value::Okay => out.push(Bytes::from_static(b"OK")),
        #[allow(unreachable_patterns)]
        other => out.push(Bytes::from(format!("{other:?}"))),
    }
}
