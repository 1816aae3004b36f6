//! Stale-result detection for long-running work
//!
//! Rasterizing a document and generating the signed output run as single
//! in-flight units. Each unit takes a `Ticket` when it starts; when it
//! finishes, its result is applied only if no newer ticket was issued in the
//! meantime (for example because the user uploaded another document).

use serde::Serialize;

/// Monotonic counter handing out tickets
#[derive(Debug, Default, Clone)]
pub struct Generation {
    latest: u64,
}

/// Proof of which generation a task was started in
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Ticket(u64);

impl Ticket {
    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Result of trying to apply a finished task
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome<T> {
    Applied(T),
    /// A newer task was started; the value was dropped
    Stale { ticket: Ticket, latest: Ticket },
}

impl<T> TaskOutcome<T> {
    pub fn is_stale(&self) -> bool {
        matches!(self, TaskOutcome::Stale { .. })
    }

    pub fn applied(self) -> Option<T> {
        match self {
            TaskOutcome::Applied(value) => Some(value),
            TaskOutcome::Stale { .. } => None,
        }
    }
}

impl Generation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new task, invalidating every earlier ticket
    pub fn next(&mut self) -> Ticket {
        self.latest += 1;
        Ticket(self.latest)
    }

    pub fn latest(&self) -> Ticket {
        Ticket(self.latest)
    }

    pub fn is_current(&self, ticket: Ticket) -> bool {
        ticket.0 == self.latest
    }

    /// Run `apply` with `value` only if `ticket` is still current
    pub fn apply<T, R>(&self, ticket: Ticket, value: T, apply: impl FnOnce(T) -> R) -> TaskOutcome<R> {
        if self.is_current(ticket) {
            TaskOutcome::Applied(apply(value))
        } else {
            tracing::warn!(
                ticket = ticket.0,
                latest = self.latest,
                "discarding stale task result"
            );
            TaskOutcome::Stale {
                ticket,
                latest: self.latest(),
            }
        }
    }
}
