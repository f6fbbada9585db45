pub mod addon;
pub mod backend;
pub mod constants;
pub mod identity;
pub mod nodepool;
pub mod phase;
pub mod state;
pub mod tag;
pub mod telemetry;
