mod declared;

pub mod addon;
pub mod config;
pub mod deadline;
pub mod error;
pub mod executor;
pub mod nodepool;
pub mod planner;
pub mod poller;
pub mod readback;
pub mod resource;

pub use crate::addon::AddonResource;
pub use crate::config::ReconcilerConfig;
pub use crate::error::{Error, ResourceKind};
pub use crate::nodepool::NodePoolResource;
pub use crate::resource::{CompositeResource, CurrentState};
