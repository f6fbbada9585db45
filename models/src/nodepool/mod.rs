//! Node pools: a cluster-managed group of nodes backed by an auto scaling group and a launch configuration.
mod client;

pub use self::client::*;

#[cfg(feature = "mockall")]
pub use self::client::MockNodePoolBackend;

use crate::phase::{Phase, PhaseClass};
use crate::state::{FieldKind, FieldSpec, TargetService};

use serde::{Deserialize, Serialize, Serializer};
use snafu::{ensure, OptionExt, ResultExt, Snafu};

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Declared field names of a node pool.
pub mod fields {
    pub const CLUSTER_ID: &str = "cluster_id";
    pub const VPC_ID: &str = "vpc_id";
    pub const KEY_IDS: &str = "key_ids";
    pub const ENHANCED_SECURITY_SERVICE: &str = "enhanced_security_service";
    pub const ENHANCED_MONITOR_SERVICE: &str = "enhanced_monitor_service";

    pub const MAX_SIZE: &str = "max_size";
    pub const MIN_SIZE: &str = "min_size";
    pub const DESIRED_CAPACITY: &str = "desired_capacity";

    pub const NAME: &str = "name";
    pub const LABELS: &str = "labels";
    pub const TAINTS: &str = "taints";
    pub const ENABLE_AUTO_SCALE: &str = "enable_auto_scale";
    pub const DELETION_PROTECTION: &str = "deletion_protection";
    pub const UNSCHEDULABLE: &str = "unschedulable";
    pub const NODE_OS: &str = "node_os";

    pub const INSTANCE_TYPE: &str = "instance_type";
    pub const SYSTEM_DISK_TYPE: &str = "system_disk_type";
    pub const SYSTEM_DISK_SIZE: &str = "system_disk_size";
    pub const DATA_DISKS: &str = "data_disks";
    pub const SECURITY_GROUP_IDS: &str = "security_group_ids";
    pub const ORDERLY_SECURITY_GROUP_IDS: &str = "orderly_security_group_ids";
    pub const INTERNET_CHARGE_TYPE: &str = "internet_charge_type";
    pub const INTERNET_MAX_BANDWIDTH_OUT: &str = "internet_max_bandwidth_out";
    pub const PUBLIC_IP_ASSIGNED: &str = "public_ip_assigned";
    pub const INSTANCE_CHARGE_TYPE: &str = "instance_charge_type";

    pub const SCALING_GROUP_NAME: &str = "scaling_group_name";
    pub const SUBNET_IDS: &str = "subnet_ids";
    pub const ZONES: &str = "zones";
    pub const TERMINATION_POLICIES: &str = "termination_policies";
    pub const RETRY_POLICY: &str = "retry_policy";
    pub const MULTI_ZONE_SUBNET_POLICY: &str = "multi_zone_subnet_policy";
    pub const DEFAULT_COOLDOWN: &str = "default_cooldown";
    pub const SCALING_MODE: &str = "scaling_mode";

    pub const TAGS: &str = "tags";

    pub const DELETE_KEEP_INSTANCE: &str = "delete_keep_instance";

    pub const LAUNCH_CONFIG_ID: &str = "launch_config_id";
    pub const AUTOSCALING_GROUP_ID: &str = "autoscaling_group_id";
    pub const STATUS: &str = "status";
    pub const NODE_COUNT: &str = "node_count";
}

use fields::*;

const fn immutable(name: &'static str) -> FieldSpec {
    FieldSpec::new(name, FieldKind::Immutable, None)
}

const fn direct(name: &'static str, service: TargetService) -> FieldSpec {
    FieldSpec::new(name, FieldKind::MutableDirect, Some(service))
}

const fn template(name: &'static str) -> FieldSpec {
    FieldSpec::new(
        name,
        FieldKind::MutableComposed,
        Some(TargetService::LaunchConfiguration),
    )
}

const fn computed(name: &'static str) -> FieldSpec {
    FieldSpec::new(name, FieldKind::Computed, None)
}

/// Every declared field of a node pool, with the service that applies it.
pub const NODE_POOL_FIELDS: &[FieldSpec] = &[
    immutable(CLUSTER_ID),
    immutable(VPC_ID),
    immutable(KEY_IDS),
    immutable(ENHANCED_SECURITY_SERVICE).backend_default(),
    immutable(ENHANCED_MONITOR_SERVICE).backend_default(),
    direct(MAX_SIZE, TargetService::Capacity),
    direct(MIN_SIZE, TargetService::Capacity),
    direct(DESIRED_CAPACITY, TargetService::Capacity).backend_default(),
    direct(NAME, TargetService::Cluster),
    direct(LABELS, TargetService::Cluster),
    direct(TAINTS, TargetService::Cluster),
    direct(ENABLE_AUTO_SCALE, TargetService::Cluster).backend_default(),
    direct(DELETION_PROTECTION, TargetService::Cluster).backend_default(),
    direct(UNSCHEDULABLE, TargetService::Cluster).backend_default(),
    direct(NODE_OS, TargetService::Cluster).backend_default(),
    template(INSTANCE_TYPE),
    template(SYSTEM_DISK_TYPE).backend_default(),
    template(SYSTEM_DISK_SIZE).backend_default(),
    template(DATA_DISKS),
    template(ORDERLY_SECURITY_GROUP_IDS).backend_default(),
    template(SECURITY_GROUP_IDS)
        .backend_default()
        .alias_of(ORDERLY_SECURITY_GROUP_IDS),
    template(INTERNET_CHARGE_TYPE).backend_default(),
    template(INTERNET_MAX_BANDWIDTH_OUT).backend_default(),
    template(PUBLIC_IP_ASSIGNED).backend_default(),
    template(INSTANCE_CHARGE_TYPE).backend_default(),
    direct(SCALING_GROUP_NAME, TargetService::ScalingGroup).backend_default(),
    direct(SUBNET_IDS, TargetService::ScalingGroup),
    direct(ZONES, TargetService::ScalingGroup).backend_default(),
    direct(TERMINATION_POLICIES, TargetService::ScalingGroup).backend_default(),
    direct(RETRY_POLICY, TargetService::ScalingGroup).backend_default(),
    direct(MULTI_ZONE_SUBNET_POLICY, TargetService::ScalingGroup).backend_default(),
    direct(DEFAULT_COOLDOWN, TargetService::ScalingGroup).backend_default(),
    direct(SCALING_MODE, TargetService::ScalingGroup).backend_default(),
    direct(TAGS, TargetService::Tag),
    FieldSpec::new(DELETE_KEEP_INSTANCE, FieldKind::Local, None),
    computed(LAUNCH_CONFIG_ID),
    computed(AUTOSCALING_GROUP_ID),
    computed(STATUS),
    computed(NODE_COUNT),
];

/// Capacity of a node pool. A consistent capacity satisfies `0 <= min <= desired <= max`.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capacity {
    pub min_size: i64,
    pub desired_capacity: i64,
    pub max_size: i64,
}

impl Capacity {
    pub fn new(min_size: i64, desired_capacity: i64, max_size: i64) -> Self {
        Capacity {
            min_size,
            desired_capacity,
            max_size,
        }
    }

    pub fn is_consistent(&self) -> bool {
        0 <= self.min_size && self.min_size <= self.desired_capacity && self.desired_capacity <= self.max_size
    }
}

impl fmt::Display for Capacity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "(min {}, desired {}, max {})",
            self.min_size, self.desired_capacity, self.max_size
        )
    }
}

#[derive(Debug, Snafu, Clone, PartialEq, Eq)]
#[snafu(visibility(pub))]
pub enum DataDiskFormatError {
    #[snafu(display("Data disk '{}' must be formatted as '<disk type>:<size in GB>'", raw))]
    MissingDiskSize { raw: String },

    #[snafu(display("Data disk '{}' has an invalid size: {}", raw, source))]
    InvalidDiskSize {
        raw: String,
        source: std::num::ParseIntError,
    },

    #[snafu(display("Data disk '{}' has an empty disk type", raw))]
    MissingDiskType { raw: String },
}

/// One data disk of the instance template, declared as `<disk type>:<size in GB>`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataDisk {
    pub disk_type: String,
    pub disk_size: i64,
}

impl FromStr for DataDisk {
    type Err = DataDiskFormatError;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        let (disk_type, disk_size) = raw.split_once(':').context(MissingDiskSizeSnafu { raw })?;
        ensure!(!disk_type.is_empty(), MissingDiskTypeSnafu { raw });
        let disk_size = disk_size.parse().context(InvalidDiskSizeSnafu { raw })?;
        Ok(DataDisk {
            disk_type: disk_type.to_string(),
            disk_size,
        })
    }
}

impl fmt::Display for DataDisk {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.disk_type, self.disk_size)
    }
}

/// The instance template held by a launch configuration.
///
/// The launch configuration service only accepts the template as a whole, so every update carries all of it.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchTemplate {
    pub instance_type: String,
    pub system_disk_type: Option<String>,
    pub system_disk_size: Option<i64>,
    pub data_disks: Vec<DataDisk>,
    /// Ordered; the first group is the primary one.
    pub security_group_ids: Vec<String>,
    pub internet_charge_type: Option<String>,
    pub internet_max_bandwidth_out: Option<i64>,
    pub public_ip_assigned: Option<bool>,
    pub instance_charge_type: Option<String>,
}

/// Launch configuration attributes fixed at creation.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginSettings {
    pub key_ids: Vec<String>,
    pub enhanced_security_service: bool,
    pub enhanced_monitor_service: bool,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchConfiguration {
    pub launch_configuration_id: String,
    pub template: LaunchTemplate,
    pub login_settings: LoginSettings,
}

/// Attributes of the auto scaling group behind a node pool.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalingGroupAttributes {
    pub scaling_group_name: Option<String>,
    pub subnet_ids: Vec<String>,
    pub zones: Vec<String>,
    pub termination_policies: Vec<String>,
    pub retry_policy: Option<String>,
    pub multi_zone_subnet_policy: Option<String>,
    pub default_cooldown: Option<i64>,
    pub scaling_mode: Option<String>,
}

impl ScalingGroupAttributes {
    /// Whether any attribute is set that the node pool creation call does not forward to the scaling group.
    pub fn has_post_create_attributes(&self) -> bool {
        !self.termination_policies.is_empty()
            || self.retry_policy.is_some()
            || self.multi_zone_subnet_policy.is_some()
            || self.default_cooldown.is_some()
            || self.scaling_mode.is_some()
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalingGroup {
    pub autoscaling_group_id: String,
    pub vpc_id: String,
    pub capacity: Capacity,
    pub attributes: ScalingGroupAttributes,
}

/// Node pool attributes owned by the cluster service.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePoolAttributes {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    /// Taints in `key=value:Effect` form.
    pub taints: Vec<String>,
    pub enable_auto_scale: bool,
    pub deletion_protection: bool,
    pub unschedulable: bool,
    pub node_os: Option<String>,
}

/// Everything needed to create a node pool in a single call.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNodePoolRequest {
    pub cluster_id: String,
    pub vpc_id: String,
    pub attributes: NodePoolAttributes,
    pub capacity: Capacity,
    pub template: LaunchTemplate,
    pub login_settings: LoginSettings,
    pub scaling_group: ScalingGroupAttributes,
    pub tags: BTreeMap<String, String>,
}

/// A node pool as described by the cluster service.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePoolDescription {
    pub cluster_id: String,
    pub node_pool_id: String,
    pub life_state: NodePoolLifeState,
    pub attributes: NodePoolAttributes,
    pub launch_configuration_id: String,
    pub autoscaling_group_id: String,
    pub node_count: i64,
    pub tags: BTreeMap<String, String>,
}

/// Lifecycle states reported for a node pool.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum NodePoolLifeState {
    Creating,
    Normal,
    Updating,
    Enabling,
    Disabling,
    Deleting,
    Deleted,
    Abnormal,
    /// A state this engine does not know; treated as still in progress.
    Other(String),
}

impl NodePoolLifeState {
    /// Classifies a state while waiting for a create or update to settle.
    ///
    /// `enabling`/`disabling` report auto scaling being toggled and are waited out.
    pub fn provisioning_class(&self) -> PhaseClass {
        match self {
            NodePoolLifeState::Normal => PhaseClass::Succeeded,
            NodePoolLifeState::Abnormal | NodePoolLifeState::Deleting | NodePoolLifeState::Deleted => {
                PhaseClass::Failed
            }
            NodePoolLifeState::Creating
            | NodePoolLifeState::Updating
            | NodePoolLifeState::Enabling
            | NodePoolLifeState::Disabling
            | NodePoolLifeState::Other(_) => PhaseClass::Pending,
        }
    }

    /// Classifies a state while waiting for a delete to finish.
    pub fn deletion_class(&self) -> PhaseClass {
        match self {
            NodePoolLifeState::Deleted => PhaseClass::Succeeded,
            _ => PhaseClass::Pending,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            NodePoolLifeState::Creating => "creating",
            NodePoolLifeState::Normal => "normal",
            NodePoolLifeState::Updating => "updating",
            NodePoolLifeState::Enabling => "enabling",
            NodePoolLifeState::Disabling => "disabling",
            NodePoolLifeState::Deleting => "deleting",
            NodePoolLifeState::Deleted => "deleted",
            NodePoolLifeState::Abnormal => "abnormal",
            NodePoolLifeState::Other(state) => state,
        }
    }
}

impl Phase for NodePoolLifeState {}

impl From<&str> for NodePoolLifeState {
    fn from(state: &str) -> Self {
        match state.to_lowercase().as_str() {
            "creating" => NodePoolLifeState::Creating,
            "normal" => NodePoolLifeState::Normal,
            "updating" => NodePoolLifeState::Updating,
            "enabling" => NodePoolLifeState::Enabling,
            "disabling" => NodePoolLifeState::Disabling,
            "deleting" => NodePoolLifeState::Deleting,
            "deleted" => NodePoolLifeState::Deleted,
            "abnormal" => NodePoolLifeState::Abnormal,
            _ => NodePoolLifeState::Other(state.to_string()),
        }
    }
}

impl fmt::Display for NodePoolLifeState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for NodePoolLifeState {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}
