//! The contract every composite resource exposes to the declarative state store.
use crate::error::{ResourceKind, Result};
use crate::readback::CanonicalState;

use async_trait::async_trait;
use models::state::{DesiredState, ImportContext, StateSnapshot};

/// What the state store last recorded for an existing resource.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CurrentState {
    pub external_id: String,
    pub state: StateSnapshot,
}

impl CurrentState {
    pub fn new<S: Into<String>>(external_id: S, state: StateSnapshot) -> Self {
        CurrentState {
            external_id: external_id.into(),
            state,
        }
    }
}

#[async_trait]
/// A resource assembled from several backend resources that is managed as one unit.
///
/// Every operation runs under a single deadline shared by all of the backend calls and polls it makes. The external
/// id returned by `apply` is the only state the caller needs to persist.
pub trait CompositeResource: Send + Sync {
    fn kind(&self) -> ResourceKind;

    /// Creates the resource when `current` is absent, otherwise updates it in place. Returns the external id.
    async fn apply(&self, current: Option<&CurrentState>, desired: &DesiredState) -> Result<String>;

    /// Reads the resource back. `known` is the last declared state, used to tell user settings from backend defaults.
    async fn read(&self, external_id: &str, known: &StateSnapshot, context: ImportContext) -> Result<CanonicalState>;

    /// Deletes the resource and waits for it to be gone. Deleting a resource that no longer exists succeeds.
    async fn destroy(&self, external_id: &str, known: &StateSnapshot) -> Result<()>;

    /// Adopts an existing resource, populating every field a read would including backend defaults.
    async fn import_from(&self, external_id: &str) -> Result<CanonicalState> {
        self.read(external_id, &StateSnapshot::new(), ImportContext::Import)
            .await
    }
}
