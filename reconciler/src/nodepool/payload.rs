//! Builds node pool backend payloads out of a declared state.
use crate::declared::DeclaredFields;
use crate::error::{self, Result};
use crate::planner::CapacityTarget;

use models::nodepool::fields::*;
use models::nodepool::{
    Capacity, CreateNodePoolRequest, DataDisk, LaunchTemplate, LoginSettings, NodePoolAttributes,
    ScalingGroupAttributes,
};

use std::collections::BTreeSet;

pub(crate) fn capacity_target(fields: &DeclaredFields) -> Result<CapacityTarget> {
    let target = CapacityTarget {
        min_size: fields.required_int(MIN_SIZE)?,
        desired_capacity: fields.int(DESIRED_CAPACITY)?,
        max_size: fields.required_int(MAX_SIZE)?,
    };
    target.validate(fields.kind())?;
    Ok(target)
}

/// The ordered security group list sent to the backend.
///
/// The groups may be declared either as the ordered list or as the older unordered set. Declaring both is only
/// accepted when they hold the same groups.
pub(crate) fn security_groups(fields: &DeclaredFields) -> Result<Vec<String>> {
    let ordered = fields.list(ORDERLY_SECURITY_GROUP_IDS)?;
    let unordered = fields.list(SECURITY_GROUP_IDS)?;

    if !ordered.is_empty() && !unordered.is_empty() {
        let ordered_members: BTreeSet<&String> = ordered.iter().collect();
        let unordered_members: BTreeSet<&String> = unordered.iter().collect();
        if ordered_members != unordered_members {
            return error::ConflictingFieldsSnafu {
                kind: fields.kind(),
                first: ORDERLY_SECURITY_GROUP_IDS,
                second: SECURITY_GROUP_IDS,
            }
            .fail();
        }
    }

    Ok(if ordered.is_empty() { unordered } else { ordered })
}

pub(crate) fn launch_template(fields: &DeclaredFields) -> Result<LaunchTemplate> {
    let data_disks = fields
        .list(DATA_DISKS)?
        .iter()
        .map(|raw| {
            raw.parse::<DataDisk>().map_err(|e| {
                error::InvalidFieldSnafu {
                    kind: fields.kind(),
                    field: DATA_DISKS,
                    message: e.to_string(),
                }
                .build()
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(LaunchTemplate {
        instance_type: fields.required_str(INSTANCE_TYPE)?,
        system_disk_type: fields.str(SYSTEM_DISK_TYPE)?,
        system_disk_size: fields.int(SYSTEM_DISK_SIZE)?,
        data_disks,
        security_group_ids: security_groups(fields)?,
        internet_charge_type: fields.str(INTERNET_CHARGE_TYPE)?,
        internet_max_bandwidth_out: fields.int(INTERNET_MAX_BANDWIDTH_OUT)?,
        public_ip_assigned: fields.bool(PUBLIC_IP_ASSIGNED)?,
        instance_charge_type: fields.str(INSTANCE_CHARGE_TYPE)?,
    })
}

pub(crate) fn login_settings(fields: &DeclaredFields) -> Result<LoginSettings> {
    Ok(LoginSettings {
        key_ids: fields.list(KEY_IDS)?,
        enhanced_security_service: fields.bool(ENHANCED_SECURITY_SERVICE)?.unwrap_or(true),
        enhanced_monitor_service: fields.bool(ENHANCED_MONITOR_SERVICE)?.unwrap_or(true),
    })
}

/// Node pool attributes to send. Backend-defaulted attributes the user never declared are taken from `live`, the
/// attributes the backend holds now, so that writing the others does not reset them.
pub(crate) fn node_pool_attributes(
    fields: &DeclaredFields,
    live: Option<&NodePoolAttributes>,
) -> Result<NodePoolAttributes> {
    Ok(NodePoolAttributes {
        name: fields.required_str(NAME)?,
        labels: fields.map(LABELS)?,
        taints: fields.list(TAINTS)?,
        enable_auto_scale: fields
            .bool(ENABLE_AUTO_SCALE)?
            .or_else(|| live.map(|live| live.enable_auto_scale))
            .unwrap_or(true),
        deletion_protection: fields
            .bool(DELETION_PROTECTION)?
            .or_else(|| live.map(|live| live.deletion_protection))
            .unwrap_or(false),
        unschedulable: fields
            .bool(UNSCHEDULABLE)?
            .or_else(|| live.map(|live| live.unschedulable))
            .unwrap_or(false),
        node_os: fields
            .str(NODE_OS)?
            .or_else(|| live.and_then(|live| live.node_os.clone())),
    })
}

pub(crate) fn scaling_group_attributes(fields: &DeclaredFields) -> Result<ScalingGroupAttributes> {
    Ok(ScalingGroupAttributes {
        scaling_group_name: fields.str(SCALING_GROUP_NAME)?,
        subnet_ids: fields.list(SUBNET_IDS)?,
        zones: fields.list(ZONES)?,
        termination_policies: fields.list(TERMINATION_POLICIES)?,
        retry_policy: fields.str(RETRY_POLICY)?,
        multi_zone_subnet_policy: fields.str(MULTI_ZONE_SUBNET_POLICY)?,
        default_cooldown: fields.int(DEFAULT_COOLDOWN)?,
        scaling_mode: fields.str(SCALING_MODE)?,
    })
}

pub(crate) fn create_request(fields: &DeclaredFields) -> Result<CreateNodePoolRequest> {
    let target = capacity_target(fields)?;
    Ok(CreateNodePoolRequest {
        cluster_id: fields.required_str(CLUSTER_ID)?,
        vpc_id: fields.required_str(VPC_ID)?,
        attributes: node_pool_attributes(fields, None)?,
        capacity: Capacity::new(
            target.min_size,
            target.desired_capacity.unwrap_or(target.min_size),
            target.max_size,
        ),
        template: launch_template(fields)?,
        login_settings: login_settings(fields)?,
        scaling_group: scaling_group_attributes(fields)?,
        tags: fields.map(TAGS)?,
    })
}
