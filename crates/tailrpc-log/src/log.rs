use tailrpc_core::{AddressPattern, Envelope, LogRecord, RecordId, Timestamp};
use thiserror::Error;

/// Errors raised by a log engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LogError {
    #[error("append rejected: {0}")]
    AppendRejected(String),
    #[error("codec error: {0}")]
    Codec(String),
    #[error("tail cursor failed: {0}")]
    Cursor(String),
}

/// Coarse per-log health counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogHealthSnapshot {
    pub appended: u64,
    pub append_errors: u64,
    pub evicted: u64,
    pub retained_records: u64,
    pub retained_bytes: u64,
    pub open_cursors: u64,
    pub last_error: Option<String>,
}

/// Server-side filter applied to a tail subscription.
#[derive(Debug, Clone)]
pub struct TailFilter {
    /// Records sent by this node are never delivered back to it.
    pub exclude_from: String,
    /// Recipient patterns the `to` field must match.
    pub recipients: AddressPattern,
    /// Records whose ttl is before this instant are skipped.
    pub not_expired_at: Timestamp,
    /// Resume position: only records after this id are delivered.
    pub after: Option<RecordId>,
}

impl TailFilter {
    pub fn accepts(&self, id: RecordId, envelope: &Envelope) -> bool {
        if self.after.is_some_and(|after| id <= after) {
            return false;
        }
        envelope.from != self.exclude_from
            && envelope.ttl >= self.not_expired_at
            && self.recipients.matches(&envelope.to)
    }
}

/// Result of polling a tail cursor once.
#[derive(Debug, Clone, PartialEq)]
pub enum CursorPoll {
    /// A newly matched record.
    Record(LogRecord),
    /// Nothing new yet; poll again later.
    Idle,
    /// The stream ended.
    Closed,
    /// The stream failed and will deliver nothing more.
    Failed(LogError),
}

/// Open-ended subscription yielding newly appended matching records.
pub trait TailCursor: Send {
    fn poll_next(&mut self) -> CursorPoll;

    /// Releases the subscription. Later polls report `Closed`.
    fn close(&mut self);
}

/// Append-only, size-bounded record log shared by every node.
pub trait RecordLog: Send + Sync {
    /// Persists one envelope and returns the identity the log assigned to it.
    fn append(&self, envelope: &Envelope) -> Result<RecordId, LogError>;

    /// Opens a continuous subscription filtered by `filter`.
    fn tail(&self, filter: TailFilter) -> Result<Box<dyn TailCursor>, LogError>;

    /// Best-effort health counters for ops decisions.
    fn health_snapshot(&self) -> LogHealthSnapshot {
        LogHealthSnapshot::default()
    }
}

#[cfg(test)]
mod tests {
    use tailrpc_core::{AddressPattern, Envelope, RecordId, Timestamp};

    use super::TailFilter;

    fn envelope(from: &str, to: &str, ttl: u64) -> Envelope {
        Envelope {
            function: "echo".to_string(),
            args: Vec::new(),
            from: from.to_string(),
            to: to.to_string(),
            cb: None,
            ttl: Timestamp(ttl),
        }
    }

    fn id(seq: u64) -> RecordId {
        RecordId {
            created: Timestamp(0),
            seq,
        }
    }

    #[test]
    fn filter_excludes_own_expired_unaddressed_and_seen_records() {
        let filter = TailFilter {
            exclude_from: "A.B".to_string(),
            recipients: AddressPattern::for_name("A.B").expect("valid name"),
            not_expired_at: Timestamp(100),
            after: Some(id(5)),
        };

        assert!(filter.accepts(id(6), &envelope("C", "A.*", 100)));
        assert!(!filter.accepts(id(6), &envelope("A.B", "A.*", 100)));
        assert!(!filter.accepts(id(6), &envelope("C", "A.*", 99)));
        assert!(!filter.accepts(id(6), &envelope("C", "X", 500)));
        assert!(!filter.accepts(id(5), &envelope("C", "*", 500)));
    }
}
