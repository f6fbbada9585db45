//! Lifecycle phases reported by asynchronously-applied backend resources.
use serde::{Deserialize, Serialize};

use std::fmt;

/// Where an observed phase sits relative to the change being waited on.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum PhaseClass {
    /// The change is still being applied; keep polling.
    Pending,
    /// The change has been applied.
    Succeeded,
    /// The change failed and no further transition is expected without new user action.
    Failed,
}

impl PhaseClass {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PhaseClass::Pending)
    }
}

/// A backend-reported phase. Implementors map the raw phase string onto a closed set of variants and keep unknown
/// values around verbatim.
pub trait Phase: Clone + fmt::Debug + fmt::Display + Send + Sync {
    /// Whether a failed phase may clear if the same change is applied again without modification.
    fn is_retryable_failure(&self) -> bool {
        false
    }
}

/// One observation of a resource's phase, together with the backend's own explanation of it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Observation<P: Phase> {
    pub phase: P,
    pub message: Option<String>,
}

impl<P: Phase> Observation<P> {
    pub fn new(phase: P) -> Self {
        Observation {
            phase,
            message: None,
        }
    }

    pub fn with_message<S: Into<String>>(phase: P, message: Option<S>) -> Self {
        Observation {
            phase,
            message: message.map(Into::into),
        }
    }
}
