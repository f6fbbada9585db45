//! Node pool operation planning.
use super::payload;
use crate::declared::DeclaredFields;
use crate::error::{ResourceKind, Result};
use crate::planner::{self, CapacityStep, Operation, OperationPlan};

use models::nodepool::fields::*;
use models::nodepool::{
    Capacity, CreateNodePoolRequest, LaunchTemplate, NodePoolAttributes, ScalingGroupAttributes,
    NODE_POOL_FIELDS,
};
use models::state::{ChangeSet, StateSnapshot, TargetService};
use models::tag::TagDiff;
use serde::Serialize;

const KIND: ResourceKind = ResourceKind::NodePool;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum NodePoolOperation {
    /// Creates the pool, its scaling group and its launch configuration in one call.
    CreateNodePool(Box<CreateNodePoolRequest>),
    UpgradeLaunchConfiguration(LaunchTemplate),
    SetCapacityBounds { min_size: i64, max_size: i64 },
    SetDesiredCapacity { desired_capacity: i64 },
    ModifyNodePool(NodePoolAttributes),
    ModifyScalingGroup(ScalingGroupAttributes),
    ModifyTags(TagDiff),
}

impl NodePoolOperation {
    /// Whether the operation writes any of min size, max size or desired capacity.
    pub fn touches_capacity(&self) -> bool {
        matches!(
            self,
            NodePoolOperation::CreateNodePool(_)
                | NodePoolOperation::SetCapacityBounds { .. }
                | NodePoolOperation::SetDesiredCapacity { .. }
        )
    }
}

impl Operation for NodePoolOperation {
    fn name(&self) -> &'static str {
        match self {
            NodePoolOperation::CreateNodePool(_) => "CreateClusterNodePool",
            NodePoolOperation::UpgradeLaunchConfiguration(_) => "UpgradeLaunchConfiguration",
            NodePoolOperation::SetCapacityBounds { .. } => "ModifyClusterNodePool",
            NodePoolOperation::SetDesiredCapacity { .. } => "ModifyNodePoolDesiredCapacity",
            NodePoolOperation::ModifyNodePool(_) => "ModifyClusterNodePool",
            NodePoolOperation::ModifyScalingGroup(_) => "ModifyAutoScalingGroup",
            NodePoolOperation::ModifyTags(_) => "ModifyResourceTags",
        }
    }

    fn target_service(&self) -> TargetService {
        match self {
            NodePoolOperation::CreateNodePool(_) | NodePoolOperation::ModifyNodePool(_) => TargetService::Cluster,
            NodePoolOperation::UpgradeLaunchConfiguration(_) => TargetService::LaunchConfiguration,
            NodePoolOperation::SetCapacityBounds { .. } | NodePoolOperation::SetDesiredCapacity { .. } => {
                TargetService::Capacity
            }
            NodePoolOperation::ModifyScalingGroup(_) => TargetService::ScalingGroup,
            NodePoolOperation::ModifyTags(_) => TargetService::Tag,
        }
    }

    fn creates_resource(&self) -> bool {
        matches!(self, NodePoolOperation::CreateNodePool(_))
    }
}

impl From<CapacityStep> for NodePoolOperation {
    fn from(step: CapacityStep) -> Self {
        match step {
            CapacityStep::Bounds { min_size, max_size } => NodePoolOperation::SetCapacityBounds { min_size, max_size },
            CapacityStep::Desired { desired_capacity } => NodePoolOperation::SetDesiredCapacity { desired_capacity },
        }
    }
}

/// Plans the creation of a node pool.
///
/// The creation call carries everything including capacity and tags. Scaling group attributes the creation call
/// does not forward are applied by a follow-up `ModifyScalingGroup` once the pool exists.
pub fn plan_create(desired: &StateSnapshot) -> Result<OperationPlan<NodePoolOperation>> {
    let fields = DeclaredFields::new(KIND, desired);
    let request = payload::create_request(&fields)?;
    let follow_up = request
        .scaling_group
        .has_post_create_attributes()
        .then(|| request.scaling_group.clone());

    let mut plan = OperationPlan::new();
    plan.push(NodePoolOperation::CreateNodePool(Box::new(request)));
    plan.extend(follow_up.map(NodePoolOperation::ModifyScalingGroup));
    Ok(plan)
}

/// What the backend holds right now for the parts of a pool an update writes as a whole.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LiveNodePool {
    /// Orders capacity writes; the stored state can lag behind, e.g. while auto scaling moves the desired capacity.
    pub capacity: Option<Capacity>,
    /// Fills the node pool attributes the user left to the backend.
    pub attributes: Option<NodePoolAttributes>,
}

/// Plans the in-place update of a node pool from `current` to `desired`.
///
/// Immutable changes are rejected before anything else is looked at. Operations are emitted as launch
/// configuration, then capacity, then node pool and scaling group attributes, then tags. Capacity writes are ordered
/// against `live.capacity`.
pub fn plan_update(
    current: &StateSnapshot,
    desired: &StateSnapshot,
    changes: &ChangeSet,
    live: &LiveNodePool,
) -> Result<OperationPlan<NodePoolOperation>> {
    planner::reject_immutable(KIND, NODE_POOL_FIELDS, changes)?;

    let fields = DeclaredFields::new(KIND, desired);
    // Conflicts and capacity are validated even when those fields did not change.
    payload::security_groups(&fields)?;
    let target = payload::capacity_target(&fields)?;

    let touches = |service| planner::touches_service(NODE_POOL_FIELDS, changes, service);
    let mut plan = OperationPlan::new();

    if touches(TargetService::LaunchConfiguration) {
        plan.push(NodePoolOperation::UpgradeLaunchConfiguration(
            payload::launch_template(&fields)?,
        ));
    }

    if touches(TargetService::Capacity) {
        plan.extend(
            planner::plan_capacity(live.capacity, target)
                .into_iter()
                .map(NodePoolOperation::from),
        );
    }

    if touches(TargetService::Cluster) {
        plan.push(NodePoolOperation::ModifyNodePool(
            payload::node_pool_attributes(&fields, live.attributes.as_ref())?,
        ));
    }

    if touches(TargetService::ScalingGroup) {
        plan.push(NodePoolOperation::ModifyScalingGroup(
            payload::scaling_group_attributes(&fields)?,
        ));
    }

    if touches(TargetService::Tag) {
        let current_tags = DeclaredFields::new(KIND, current).map(TAGS)?;
        let diff = TagDiff::between(&current_tags, &fields.map(TAGS)?);
        if !diff.is_empty() {
            plan.push(NodePoolOperation::ModifyTags(diff));
        }
    }

    Ok(plan)
}
