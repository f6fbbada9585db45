//! Issues single backend operations with bounded, jittered retry.
use crate::config::ReconcilerConfig;
use crate::deadline::Deadline;
use crate::error::{self, ResourceKind, Result};

use models::backend::{BackendError, BackendResult, FailureClass};
use models::constants::{AUDIT_BODY_LIMIT, AUDIT_TRUNCATION_MARKER};

use serde::Serialize;
use snafu::ResultExt;
use std::future::Future;
use std::sync::Mutex;
use strum_macros::Display;
use tokio::time::Duration;
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    RetryIf,
};
use tracing::{event, instrument, Level};

/// Whether a call only observes backend state or changes it. Writes get the longer timeout.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum CallKind {
    Read,
    Write,
}

/// Retries only failures that are expected to clear up on their own.
struct RetryTransient {
    kind: ResourceKind,
    operation: String,
}

impl tokio_retry::Condition<BackendError> for RetryTransient {
    fn should_retry(&mut self, error: &BackendError) -> bool {
        match error.class() {
            FailureClass::Transient => {
                event!(
                    Level::WARN,
                    kind = %self.kind,
                    operation = %self.operation,
                    "Transient failure, retrying: '{}'",
                    error
                );
                true
            }
            FailureClass::NotFound => false,
            FailureClass::Terminal => {
                event!(
                    Level::ERROR,
                    kind = %self.kind,
                    operation = %self.operation,
                    "Backend rejected operation: '{}'",
                    error
                );
                false
            }
        }
    }
}

/// Runs backend calls for one resource kind.
#[derive(Clone, Debug)]
pub struct Executor {
    kind: ResourceKind,
    read_timeout: Duration,
    write_timeout: Duration,
    retry_base_delay: Duration,
    retry_max_delay: Duration,
}

impl Executor {
    pub fn new(kind: ResourceKind, config: &ReconcilerConfig) -> Self {
        Executor {
            kind,
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
            retry_base_delay: config.retry_base_delay,
            retry_max_delay: config.retry_max_delay,
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Doubles from the base delay up to the max delay, each delay jittered. The strategy never runs out on its
    /// own; the call timeout ends it.
    fn retry_strategy(&self) -> impl Iterator<Item = Duration> {
        let half_base_millis = (self.retry_base_delay.as_millis() as u64 / 2).max(1);
        ExponentialBackoff::from_millis(2)
            .factor(half_base_millis)
            .max_delay(self.retry_max_delay)
            .map(jitter)
    }

    fn call_timeout(&self, call_kind: CallKind) -> Duration {
        match call_kind {
            CallKind::Read => self.read_timeout,
            CallKind::Write => self.write_timeout,
        }
    }

    /// Issues one backend operation.
    ///
    /// Transient failures are retried until the call timeout for `call_kind` or the operation deadline, whichever
    /// comes first, and then surface as `DeadlineExceeded` carrying the last failure. Any other failure is returned
    /// immediately as `BackendRejected`. `request` is only used for audit logging.
    #[instrument(skip(self, request, call), fields(kind = %self.kind), err)]
    pub async fn execute<Req, T, F, Fut>(
        &self,
        operation: &str,
        call_kind: CallKind,
        deadline: &Deadline,
        request: &Req,
        mut call: F,
    ) -> Result<T>
    where
        Req: Serialize + ?Sized + Sync,
        T: Serialize + Send,
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = BackendResult<T>> + Send,
    {
        event!(
            Level::DEBUG,
            %call_kind,
            request = %audit_body(request),
            "Calling '{}'",
            operation
        );

        let last_error: Mutex<Option<String>> = Mutex::new(None);
        let condition = RetryTransient {
            kind: self.kind,
            operation: operation.to_string(),
        };
        let attempts = RetryIf::spawn(
            self.retry_strategy(),
            || {
                let attempt = call();
                let last_error = &last_error;
                async move {
                    let result = attempt.await;
                    if let (Err(e), Ok(mut last)) = (&result, last_error.lock()) {
                        *last = Some(e.to_string());
                    }
                    result
                }
            },
            condition,
        );

        let timeout = deadline.cap(self.call_timeout(call_kind));
        let response = match tokio::time::timeout(timeout, attempts).await {
            Ok(result) => result.context(error::BackendRejectedSnafu {
                kind: self.kind,
                operation,
            })?,
            Err(_) => {
                let last_error = last_error.lock().ok().and_then(|last| last.clone());
                event!(
                    Level::ERROR,
                    "'{}' did not succeed within {:.2}s",
                    operation,
                    timeout.as_secs_f64()
                );
                return error::DeadlineExceededSnafu {
                    kind: self.kind,
                    operation,
                    last_error,
                }
                .fail();
            }
        };

        event!(
            Level::DEBUG,
            %call_kind,
            response = %audit_body(&response),
            "'{}' succeeded",
            operation
        );
        Ok(response)
    }
}

/// Renders a request or response for the audit log, truncated to a bounded number of characters.
fn audit_body<T: Serialize + ?Sized>(body: &T) -> String {
    match serde_json::to_string(body) {
        Ok(rendered) => truncate(rendered, AUDIT_BODY_LIMIT),
        Err(e) => format!("<unrenderable: {}>", e),
    }
}

fn truncate(mut rendered: String, limit: usize) -> String {
    if let Some((cut, _)) = rendered.char_indices().nth(limit) {
        rendered.truncate(cut);
        rendered.push_str(AUDIT_TRUNCATION_MARKER);
    }
    rendered
}
