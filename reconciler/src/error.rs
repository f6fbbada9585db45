use models::backend::BackendError;
use models::identity::FormatError;

use snafu::Snafu;
use strum_macros::Display;

/// The crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// The kinds of composite resource this crate reconciles.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum ResourceKind {
    NodePool,
    AddonAttachment,
}

/// The crate-wide error type.
///
/// Transient backend failures are retried inside the executor and never leave it as such; every error returned
/// here is final for the invocation that produced it.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display(
        "{} operation '{}' did not complete before its deadline; last error: {}",
        kind,
        operation,
        last_error.as_deref().unwrap_or("none")
    ))]
    DeadlineExceeded {
        kind: ResourceKind,
        operation: String,
        last_error: Option<String>,
    },

    #[snafu(display("{} operation '{}' was rejected: {}", kind, operation, source))]
    BackendRejected {
        kind: ResourceKind,
        operation: String,
        source: BackendError,
    },

    #[snafu(display(
        "Field '{}' of {} cannot be changed in place; the resource must be recreated",
        field,
        kind
    ))]
    ImmutableField { kind: ResourceKind, field: String },

    #[snafu(display("Fields '{}' and '{}' of {} cannot both be set", first, second, kind))]
    ConflictingFields {
        kind: ResourceKind,
        first: String,
        second: String,
    },

    #[snafu(display(
        "Invalid {} capacity: min {}, desired {}, max {}; expected 0 <= min <= desired <= max",
        kind,
        min_size,
        desired_capacity.map(|d| d.to_string()).unwrap_or_else(|| "unset".to_string()),
        max_size
    ))]
    InvalidCapacity {
        kind: ResourceKind,
        min_size: i64,
        desired_capacity: Option<i64>,
        max_size: i64,
    },

    #[snafu(display("Required field '{}' of {} is not set", field, kind))]
    MissingField { kind: ResourceKind, field: String },

    #[snafu(display("Field '{}' of {} is invalid: {}", field, kind, message))]
    InvalidField {
        kind: ResourceKind,
        field: String,
        message: String,
    },

    #[snafu(display(
        "{} operation '{}' failed after [{}] had already been applied: {}",
        kind,
        failed,
        committed.join(", "),
        source
    ))]
    PartialApply {
        kind: ResourceKind,
        failed: String,
        committed: Vec<String>,
        #[snafu(source(from(Error, Box::new)))]
        source: Box<Error>,
    },

    #[snafu(display(
        "{} '{}' reached failed phase '{}' during '{}': {}",
        kind,
        resource_id,
        phase,
        operation,
        status_message.as_deref().unwrap_or("no status message reported")
    ))]
    AsyncApply {
        kind: ResourceKind,
        resource_id: String,
        operation: String,
        phase: String,
        status_message: Option<String>,
        /// The failure may clear if the same change is applied again.
        retryable: bool,
    },

    #[snafu(display(
        "Timed out waiting for {} '{}' during '{}'; last observed phase: {}",
        kind,
        resource_id,
        operation,
        last_phase.as_deref().unwrap_or("none")
    ))]
    PollTimeout {
        kind: ResourceKind,
        resource_id: String,
        operation: String,
        last_phase: Option<String>,
        status_message: Option<String>,
    },

    #[snafu(display("{} '{}' does not exist", kind, resource_id))]
    NotFound {
        kind: ResourceKind,
        resource_id: String,
    },

    #[snafu(display("{} '{}' has no {} id", kind, resource_id, dependent))]
    MissingDependentId {
        kind: ResourceKind,
        resource_id: String,
        dependent: String,
    },

    #[snafu(display("{} operation '{}' cannot be applied to an existing resource", kind, operation))]
    UnexpectedOperation { kind: ResourceKind, operation: String },

    #[snafu(display("Invalid {} identifier: {}", kind, source))]
    Identity {
        kind: ResourceKind,
        source: FormatError,
    },

    #[snafu(display("Unable to render {} request body: {}", kind, source))]
    RequestBody {
        kind: ResourceKind,
        source: serde_json::Error,
    },

    #[snafu(display("Could not parse environment variable '{}={}': {}", variable, value, source))]
    Configuration {
        variable: String,
        value: String,
        source: std::num::ParseIntError,
    },

    #[snafu(display("Invalid reconciler configuration: {}", message))]
    InvalidConfiguration { message: String },
}

impl Error {
    /// Whether the caller must destroy and recreate the resource to reach the desired state.
    pub fn requires_recreation(&self) -> bool {
        matches!(self, Error::ImmutableField { .. })
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::BackendRejected { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// Whether the operation ran out of time, as opposed to being refused by the backend.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::DeadlineExceeded { .. } | Error::PollTimeout { .. })
    }
}
