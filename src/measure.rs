use serde::Serialize;

use crate::transaction::{Protocol, TransactionRecord};

pub const REQUESTS: &str = "requests";
pub const REQUEST_RTT: &str = "request.rtt.seconds";
pub const ERRORS: &str = "errors";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MeasureKind {
    Counter,
    Histogram,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Tag {
    pub name: String,
    pub value: String,
}

impl Tag {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// One named, tagged observation handed to an [`Engine`](crate::engine::Engine).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Measure {
    pub name: String,
    pub tags: Vec<Tag>,
    pub value: f64,
    pub kind: MeasureKind,
}

impl Measure {
    pub fn counter(name: &str, tags: Vec<Tag>) -> Self {
        Self {
            name: name.into(),
            tags,
            value: 1.0,
            kind: MeasureKind::Counter,
        }
    }

    pub fn histogram(name: &str, tags: Vec<Tag>, value: f64) -> Self {
        Self {
            name: name.into(),
            tags,
            value,
            kind: MeasureKind::Histogram,
        }
    }

    /// `name{k=v,...}`, used as the series key by in-process engines.
    pub fn series(&self) -> String {
        if self.tags.is_empty() {
            return self.name.clone();
        }
        let tags: Vec<String> = self
            .tags
            .iter()
            .map(|t| format!("{}={}", t.name, t.value))
            .collect();
        format!("{}{{{}}}", self.name, tags.join(","))
    }
}

/// Derives the emissions for a completed transaction.
///
/// Always a `requests` counter first, followed by either the round-trip
/// histogram or a single `errors` counter.
pub fn measures_for(record: &TransactionRecord) -> Vec<Measure> {
    let label_name = match record.protocol {
        Protocol::HttpServer | Protocol::HttpClient => "http_req_method",
        Protocol::KeyValue => "command",
    };
    let label = Tag::new(label_name, record.command.clone().unwrap_or_default());

    let mut out = Vec::with_capacity(2);
    out.push(Measure::counter(REQUESTS, vec![label.clone()]));

    let upstream = record.upstream.as_ref().map(|u| Tag::new("upstream", u.clone()));

    match record.error {
        Some(kind) => {
            let mut tags = vec![Tag::new("type", kind.type_name())];
            if let crate::ErrorKind::Network(op) = kind {
                tags.push(Tag::new("operation", op.as_str()));
            }
            tags.extend(upstream);
            out.push(Measure::counter(ERRORS, tags));
        }
        None => {
            let mut tags = vec![label];
            match record.protocol {
                Protocol::HttpServer => {
                    tags.push(Tag::new("http_res_status", record.status_code.to_string()));
                }
                Protocol::HttpClient | Protocol::KeyValue => tags.extend(upstream),
            }
            out.push(Measure::histogram(
                REQUEST_RTT,
                tags,
                record.response_time().as_secs_f64(),
            ));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ErrorKind, Operation};

    fn kv_record(error: Option<ErrorKind>) -> TransactionRecord {
        let mut record = TransactionRecord::new(Protocol::KeyValue, chrono::Utc::now());
        record.command = Some("GET".into());
        record.upstream = Some("9.9.9.9:6379".into());
        record.error = error;
        record
    }

    #[test]
    fn success_emits_counter_then_rtt() {
        let measures = measures_for(&kv_record(None));
        assert_eq!(measures.len(), 2);
        assert_eq!(measures[0].name, REQUESTS);
        assert_eq!(measures[0].tags, vec![Tag::new("command", "GET")]);
        assert_eq!(measures[1].name, REQUEST_RTT);
        assert_eq!(measures[1].kind, MeasureKind::Histogram);
        assert_eq!(
            measures[1].tags,
            vec![Tag::new("command", "GET"), Tag::new("upstream", "9.9.9.9:6379")]
        );
    }

    #[test]
    fn network_error_carries_operation() {
        let measures = measures_for(&kv_record(Some(ErrorKind::Network(Operation::Read))));
        assert_eq!(measures[1].name, ERRORS);
        assert_eq!(
            measures[1].tags,
            vec![
                Tag::new("type", "network"),
                Tag::new("operation", "read"),
                Tag::new("upstream", "9.9.9.9:6379"),
            ]
        );
    }

    #[test]
    fn response_error_has_no_operation() {
        let measures = measures_for(&kv_record(Some(ErrorKind::Response)));
        assert_eq!(
            measures[1].tags,
            vec![Tag::new("type", "response"), Tag::new("upstream", "9.9.9.9:6379")]
        );
    }

    #[test]
    fn series_key() {
        let m = Measure::counter(REQUESTS, vec![Tag::new("command", "SET")]);
        assert_eq!(m.series(), "requests{command=SET}");
        assert_eq!(Measure::counter(ERRORS, vec![]).series(), "errors");
    }
}
