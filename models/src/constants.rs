// Tagging
pub const TAG_SERVICE: &str = "tke"; // The service segment of taggable resource names.
pub const CLUSTER_RESOURCE_TYPE: &str = "cluster"; // Node pools are tagged as sub-resources of their cluster.
pub const NODE_POOL_RESOURCE_SEGMENT: &str = "nodepool";

// Audit logging
pub const AUDIT_BODY_LIMIT: usize = 512; // Characters of a request or response body kept in audit logs.
pub const AUDIT_TRUNCATION_MARKER: &str = "...";

// Environment variables read by the reconciler configuration
pub const READ_TIMEOUT_ENV_VAR: &str = "RECONCILER_READ_TIMEOUT_SECS";
pub const WRITE_TIMEOUT_ENV_VAR: &str = "RECONCILER_WRITE_TIMEOUT_SECS";
pub const OPERATION_TIMEOUT_ENV_VAR: &str = "RECONCILER_OPERATION_TIMEOUT_SECS";
pub const POLL_INTERVAL_ENV_VAR: &str = "RECONCILER_POLL_INTERVAL_SECS";
pub const RETRY_BASE_DELAY_ENV_VAR: &str = "RECONCILER_RETRY_BASE_DELAY_SECS";
pub const RETRY_MAX_DELAY_ENV_VAR: &str = "RECONCILER_RETRY_MAX_DELAY_SECS";
