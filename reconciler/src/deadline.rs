use tokio::time::{Duration, Instant};

/// The point in time by which a whole create, update, delete or read must finish.
///
/// One deadline is created per operation and handed to every backend call and poll it makes, so no single stuck
/// call can outlive the operation.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Deadline {
    expires_at: Instant,
}

impl Deadline {
    pub fn after(timeout: Duration) -> Self {
        Deadline {
            expires_at: Instant::now() + timeout,
        }
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Shortens `timeout` so that it ends no later than this deadline.
    pub fn cap(&self, timeout: Duration) -> Duration {
        timeout.min(self.remaining())
    }
}
