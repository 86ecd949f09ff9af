use std::time::Duration;

use tailrpc_core::{RecordId, Timestamp};
use tailrpc_log::{CursorPoll, LogError, RecordLog, TailCursor, TailFilter};

/// Lifecycle of the tailing consumer. `Paused` is a sub-state of running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Stopped,
    Starting,
    Running,
    Paused,
}

/// Single cancelable periodic task. Arming replaces any pending deadline,
/// so at most one sweep is ever scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepTimer {
    interval: Duration,
    next_due: Option<Timestamp>,
}

impl SweepTimer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_due: None,
        }
    }

    pub fn arm(&mut self, now: Timestamp) {
        self.next_due = Some(now.saturating_add(self.interval));
    }

    pub fn cancel(&mut self) {
        self.next_due = None;
    }

    pub fn is_armed(&self) -> bool {
        self.next_due.is_some()
    }

    pub fn next_due(&self) -> Option<Timestamp> {
        self.next_due
    }

    /// Returns true and schedules the next tick when the deadline has passed.
    pub fn fire_if_due(&mut self, now: Timestamp) -> bool {
        match self.next_due {
            Some(due) if now >= due => {
                self.next_due = Some(now.saturating_add(self.interval));
                true
            }
            _ => false,
        }
    }
}

/// Owns the log subscription and the sweep schedule of one engine.
pub(crate) struct TailingConsumer {
    state: ConsumerState,
    cursor: Option<Box<dyn TailCursor>>,
    sweep: SweepTimer,
    last_dispatched: Option<RecordId>,
}

impl TailingConsumer {
    pub(crate) fn new(sweep_interval: Duration) -> Self {
        Self {
            state: ConsumerState::Stopped,
            cursor: None,
            sweep: SweepTimer::new(sweep_interval),
            last_dispatched: None,
        }
    }

    pub(crate) fn state(&self) -> ConsumerState {
        self.state
    }

    pub(crate) fn sweep(&self) -> &SweepTimer {
        &self.sweep
    }

    pub(crate) fn begin(&mut self) {
        self.state = ConsumerState::Starting;
    }

    /// Opens the subscription and arms the sweep. On failure the consumer is
    /// left stopped.
    pub(crate) fn open(
        &mut self,
        log: &dyn RecordLog,
        mut filter: TailFilter,
        now: Timestamp,
    ) -> Result<(), LogError> {
        filter.after = self.last_dispatched;
        match log.tail(filter) {
            Ok(cursor) => {
                self.cursor = Some(cursor);
                self.sweep.arm(now);
                self.state = ConsumerState::Running;
                Ok(())
            }
            Err(err) => {
                self.state = ConsumerState::Stopped;
                Err(err)
            }
        }
    }

    /// Releases the subscription and cancels the sweep.
    pub(crate) fn release(&mut self) {
        if let Some(mut cursor) = self.cursor.take() {
            cursor.close();
        }
        self.sweep.cancel();
        self.state = ConsumerState::Stopped;
    }

    pub(crate) fn pause(&mut self) -> bool {
        if self.state != ConsumerState::Running {
            return false;
        }
        self.sweep.cancel();
        self.state = ConsumerState::Paused;
        true
    }

    pub(crate) fn resume(&mut self, now: Timestamp) -> bool {
        if self.state != ConsumerState::Paused {
            return false;
        }
        self.sweep.arm(now);
        self.state = ConsumerState::Running;
        true
    }

    /// Next cursor result, or `None` unless running.
    pub(crate) fn next(&mut self) -> Option<CursorPoll> {
        if self.state != ConsumerState::Running {
            return None;
        }
        self.cursor.as_mut().map(|cursor| cursor.poll_next())
    }

    pub(crate) fn mark_dispatched(&mut self, id: RecordId) {
        self.last_dispatched = Some(id);
    }

    pub(crate) fn sweep_due(&mut self, now: Timestamp) -> bool {
        self.state == ConsumerState::Running && self.sweep.fire_if_due(now)
    }
}
