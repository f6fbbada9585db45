//! Waits for asynchronously-applied changes to reach a terminal phase.
use crate::config::ReconcilerConfig;
use crate::deadline::Deadline;
use crate::error::{self, Error, ResourceKind, Result};

use models::phase::{Observation, Phase, PhaseClass};

use chrono::{DateTime, Utc};
use std::future::Future;
use tokio::time::{sleep, Duration};
use tracing::{event, instrument, Level};

/// The terminal observation a poll ended on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PollResult<P: Phase> {
    pub phase: P,
    pub terminal: bool,
    pub succeeded: bool,
    pub retryable_failure: bool,
    /// The backend's status message for the final phase, verbatim.
    pub status_message: Option<String>,
    pub queries: usize,
    pub observed_at: DateTime<Utc>,
}

impl<P: Phase> PollResult<P> {
    /// Converts a terminal failure into an `AsyncApply` error.
    pub fn into_result(self, kind: ResourceKind, resource_id: &str, operation: &str) -> Result<Self> {
        if self.succeeded {
            return Ok(self);
        }
        error::AsyncApplySnafu {
            kind,
            resource_id,
            operation,
            phase: self.phase.to_string(),
            status_message: self.status_message,
            retryable: self.retryable_failure,
        }
        .fail()
    }
}

/// Polls one resource at a fixed interval.
#[derive(Clone, Debug)]
pub struct Poller {
    kind: ResourceKind,
    interval: Duration,
}

impl Poller {
    pub fn new(kind: ResourceKind, config: &ReconcilerConfig) -> Self {
        Poller {
            kind,
            interval: config.poll_interval,
        }
    }

    /// Queries `resource_id` until `classify` reports a terminal phase, sleeping between queries.
    ///
    /// Returns once, on the first terminal phase, whether it is a success or a failure. If the deadline passes
    /// first, returns `PollTimeout` with the last phase seen. A query whose own retries run out is simply repeated
    /// while the deadline allows. Other query errors are returned as they are; `query` is expected to route its
    /// calls through the executor so that transient failures are already retried.
    #[instrument(skip(self, query, classify), fields(kind = %self.kind), err)]
    pub async fn poll_until<P, Q, Fut, C>(
        &self,
        resource_id: &str,
        operation: &str,
        deadline: &Deadline,
        mut query: Q,
        classify: C,
    ) -> Result<PollResult<P>>
    where
        P: Phase,
        Q: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<Observation<P>>> + Send,
        C: Fn(&P) -> PhaseClass + Send + Sync,
    {
        let mut queries = 0;
        let mut last: Option<Observation<P>> = None;

        loop {
            let timed_out = |last: Option<Observation<P>>| -> Result<PollResult<P>> {
                error::PollTimeoutSnafu {
                    kind: self.kind,
                    resource_id,
                    operation,
                    last_phase: last.as_ref().map(|o| o.phase.to_string()),
                    status_message: last.and_then(|o| o.message),
                }
                .fail()
            };

            if deadline.is_expired() {
                return timed_out(last);
            }

            queries += 1;
            let observation = match tokio::time::timeout(deadline.remaining(), query()).await {
                Ok(Ok(observation)) => observation,
                // A single query ran out of retries; the wait goes on while the operation has time left.
                Ok(Err(Error::DeadlineExceeded { last_error, .. })) if !deadline.is_expired() => {
                    event!(
                        Level::WARN,
                        "Query {} for '{}' gave up ({}); polling again",
                        queries,
                        resource_id,
                        last_error.as_deref().unwrap_or("timed out")
                    );
                    sleep(deadline.cap(self.interval)).await;
                    continue;
                }
                Ok(Err(Error::DeadlineExceeded { .. })) | Err(_) => return timed_out(last),
                Ok(Err(e)) => return Err(e),
            };

            let class = classify(&observation.phase);
            event!(
                Level::DEBUG,
                phase = %observation.phase,
                ?class,
                "Observed '{}' (query {})",
                resource_id,
                queries
            );

            if class.is_terminal() {
                let succeeded = class == PhaseClass::Succeeded;
                if !succeeded {
                    event!(
                        Level::WARN,
                        "'{}' reached failed phase '{}': {}",
                        resource_id,
                        observation.phase,
                        observation.message.as_deref().unwrap_or("no status message")
                    );
                }
                return Ok(PollResult {
                    retryable_failure: !succeeded && observation.phase.is_retryable_failure(),
                    phase: observation.phase,
                    terminal: true,
                    succeeded,
                    status_message: observation.message,
                    queries,
                    observed_at: Utc::now(),
                });
            }

            last = Some(observation);
            sleep(deadline.cap(self.interval)).await;
        }
    }
}
