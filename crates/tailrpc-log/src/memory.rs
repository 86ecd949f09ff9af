use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tailrpc_codec::{decode_envelope_cbor, encode_envelope_cbor};
use tailrpc_core::{Clock, Envelope, LogRecord, RecordId, Timestamp};
use tracing::debug;

use crate::log::{CursorPoll, LogError, LogHealthSnapshot, RecordLog, TailCursor, TailFilter};

/// Default byte bound of a capped log (10 MiB).
pub const DEFAULT_CAPACITY_BYTES: usize = 10 * 1024 * 1024;

struct StoredRecord {
    id: RecordId,
    bytes: Vec<u8>,
}

enum CursorFault {
    Close,
    Fail(String),
}

struct LogInner {
    records: VecDeque<StoredRecord>,
    capacity_bytes: usize,
    retained_bytes: usize,
    next_seq: u64,
    last_created: Timestamp,
    append_fault: Option<String>,
    open_cursors: HashSet<u64>,
    cursor_faults: HashMap<u64, CursorFault>,
    next_cursor_id: u64,
    appended: u64,
    append_errors: u64,
    evicted: u64,
    last_error: Option<String>,
}

impl LogInner {
    fn record_error(&mut self, err: &LogError) {
        self.append_errors += 1;
        self.last_error = Some(err.to_string());
    }

    /// A cursor ends with the first fault injected into it; later ones are
    /// ignored until that fault has been delivered.
    fn inject_fault(&mut self, fault: impl Fn() -> CursorFault) {
        let ids: Vec<u64> = self.open_cursors.iter().copied().collect();
        for id in ids {
            self.cursor_faults.entry(id).or_insert_with(&fault);
        }
    }

    fn evict_over_capacity(&mut self) {
        while self.retained_bytes > self.capacity_bytes {
            let Some(oldest) = self.records.pop_front() else {
                break;
            };
            self.retained_bytes -= oldest.bytes.len();
            self.evicted += 1;
            debug!(seq = oldest.id.seq, "evicted record from capped log");
        }
    }
}

fn lock(inner: &Mutex<LogInner>) -> MutexGuard<'_, LogInner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory capped log: records are stored CBOR-encoded and the oldest are
/// evicted once the byte bound is exceeded.
///
/// Clones share the same storage, so one instance can back many engines.
#[derive(Clone)]
pub struct CappedMemoryLog {
    inner: Arc<Mutex<LogInner>>,
    clock: Arc<dyn Clock>,
}

impl CappedMemoryLog {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_capacity(DEFAULT_CAPACITY_BYTES, clock)
    }

    pub fn with_capacity(capacity_bytes: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(LogInner {
                records: VecDeque::new(),
                capacity_bytes,
                retained_bytes: 0,
                next_seq: 0,
                last_created: Timestamp::default(),
                append_fault: None,
                open_cursors: HashSet::new(),
                cursor_faults: HashMap::new(),
                next_cursor_id: 0,
                appended: 0,
                append_errors: 0,
                evicted: 0,
                last_error: None,
            })),
            clock,
        }
    }

    /// Number of retained records.
    pub fn len(&self) -> usize {
        lock(&self.inner).records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decoded copy of every retained record, oldest first.
    pub fn records(&self) -> Vec<LogRecord> {
        lock(&self.inner)
            .records
            .iter()
            .filter_map(|stored| {
                decode_envelope_cbor(&stored.bytes)
                    .ok()
                    .map(|envelope| LogRecord {
                        id: stored.id,
                        envelope,
                    })
            })
            .collect()
    }

    /// If set, every append fails with this reason (storage outage simulation).
    pub fn set_append_fault(&self, reason: Option<String>) {
        lock(&self.inner).append_fault = reason;
    }

    /// Ends every open subscription as if the server closed the stream.
    pub fn close_cursors(&self) {
        lock(&self.inner).inject_fault(|| CursorFault::Close);
    }

    /// Fails every open subscription with `reason`.
    pub fn fail_cursors(&self, reason: &str) {
        lock(&self.inner).inject_fault(|| CursorFault::Fail(reason.to_string()));
    }
}

impl RecordLog for CappedMemoryLog {
    fn append(&self, envelope: &Envelope) -> Result<RecordId, LogError> {
        let encoded = encode_envelope_cbor(envelope).map_err(|e| LogError::Codec(e.to_string()));
        let now = self.clock.now();
        let mut inner = lock(&self.inner);

        let bytes = match encoded {
            Ok(bytes) => bytes,
            Err(err) => {
                inner.record_error(&err);
                return Err(err);
            }
        };
        if let Some(reason) = inner.append_fault.clone() {
            let err = LogError::AppendRejected(reason);
            inner.record_error(&err);
            return Err(err);
        }
        if bytes.len() > inner.capacity_bytes {
            let err = LogError::AppendRejected(format!(
                "record of {} bytes exceeds log capacity of {} bytes",
                bytes.len(),
                inner.capacity_bytes
            ));
            inner.record_error(&err);
            return Err(err);
        }

        let created = now.max(inner.last_created);
        inner.last_created = created;
        let id = RecordId {
            created,
            seq: inner.next_seq,
        };
        inner.next_seq += 1;
        inner.retained_bytes += bytes.len();
        inner.records.push_back(StoredRecord { id, bytes });
        inner.appended += 1;
        inner.evict_over_capacity();
        Ok(id)
    }

    fn tail(&self, filter: TailFilter) -> Result<Box<dyn TailCursor>, LogError> {
        let mut inner = lock(&self.inner);
        let id = inner.next_cursor_id;
        inner.next_cursor_id += 1;
        inner.open_cursors.insert(id);
        let next_seq = inner
            .records
            .front()
            .map(|r| r.id.seq)
            .unwrap_or(inner.next_seq);
        Ok(Box::new(MemoryCursor {
            inner: Arc::clone(&self.inner),
            id,
            filter,
            next_seq,
            closed: false,
        }))
    }

    fn health_snapshot(&self) -> LogHealthSnapshot {
        let inner = lock(&self.inner);
        LogHealthSnapshot {
            appended: inner.appended,
            append_errors: inner.append_errors,
            evicted: inner.evicted,
            retained_records: inner.records.len() as u64,
            retained_bytes: inner.retained_bytes as u64,
            open_cursors: inner.open_cursors.len() as u64,
            last_error: inner.last_error.clone(),
        }
    }
}

struct MemoryCursor {
    inner: Arc<Mutex<LogInner>>,
    id: u64,
    filter: TailFilter,
    next_seq: u64,
    closed: bool,
}

impl TailCursor for MemoryCursor {
    fn poll_next(&mut self) -> CursorPoll {
        if self.closed {
            return CursorPoll::Closed;
        }
        let mut guard = lock(&self.inner);
        let inner = &mut *guard;

        if let Some(fault) = inner.cursor_faults.remove(&self.id) {
            inner.open_cursors.remove(&self.id);
            self.closed = true;
            return match fault {
                CursorFault::Close => CursorPoll::Closed,
                CursorFault::Fail(reason) => CursorPoll::Failed(LogError::Cursor(reason)),
            };
        }

        let Some(front_seq) = inner.records.front().map(|r| r.id.seq) else {
            return CursorPoll::Idle;
        };
        if self.next_seq < front_seq {
            debug!(
                skipped = front_seq - self.next_seq,
                "tail cursor fell behind eviction"
            );
            self.next_seq = front_seq;
        }

        let start = (self.next_seq - front_seq) as usize;
        for stored in inner.records.iter().skip(start) {
            self.next_seq = stored.id.seq + 1;
            let envelope = match decode_envelope_cbor(&stored.bytes) {
                Ok(envelope) => envelope,
                Err(err) => {
                    self.closed = true;
                    inner.open_cursors.remove(&self.id);
                    return CursorPoll::Failed(LogError::Codec(err.to_string()));
                }
            };
            if self.filter.accepts(stored.id, &envelope) {
                return CursorPoll::Record(LogRecord {
                    id: stored.id,
                    envelope,
                });
            }
        }
        CursorPoll::Idle
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let mut inner = lock(&self.inner);
        inner.open_cursors.remove(&self.id);
        inner.cursor_faults.remove(&self.id);
    }
}

impl Drop for MemoryCursor {
    fn drop(&mut self) {
        self.close();
    }
}
