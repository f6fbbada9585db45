//! Merges the three backend views of a node pool into one canonical snapshot.
use crate::readback::{self, CanonicalState};

use models::nodepool::fields::*;
use models::nodepool::{LaunchConfiguration, NodePoolDescription, ScalingGroup, NODE_POOL_FIELDS};
use models::state::{ImportContext, StateSnapshot};

use std::collections::BTreeSet;

/// Builds the snapshot of every field the backend reports, before any masking.
pub(crate) fn merge(
    description: &NodePoolDescription,
    launch_configuration: &LaunchConfiguration,
    scaling_group: &ScalingGroup,
) -> CanonicalState {
    let mut state = StateSnapshot::new();

    state.set(CLUSTER_ID, description.cluster_id.as_str());
    state.set(VPC_ID, scaling_group.vpc_id.as_str());
    let login = &launch_configuration.login_settings;
    state.set(KEY_IDS, login.key_ids.clone());
    state.set(ENHANCED_SECURITY_SERVICE, login.enhanced_security_service);
    state.set(ENHANCED_MONITOR_SERVICE, login.enhanced_monitor_service);

    // The scaling group is the authority on capacity.
    let capacity = scaling_group.capacity;
    state.set(MIN_SIZE, capacity.min_size);
    state.set(DESIRED_CAPACITY, capacity.desired_capacity);
    state.set(MAX_SIZE, capacity.max_size);

    let attributes = &description.attributes;
    state.set(NAME, attributes.name.as_str());
    state.set(LABELS, attributes.labels.clone());
    state.set(TAINTS, attributes.taints.clone());
    state.set(ENABLE_AUTO_SCALE, attributes.enable_auto_scale);
    state.set(DELETION_PROTECTION, attributes.deletion_protection);
    state.set(UNSCHEDULABLE, attributes.unschedulable);
    state.set_opt(NODE_OS, attributes.node_os.clone());

    let template = &launch_configuration.template;
    state.set(INSTANCE_TYPE, template.instance_type.as_str());
    state.set_opt(SYSTEM_DISK_TYPE, template.system_disk_type.clone());
    state.set_opt(SYSTEM_DISK_SIZE, template.system_disk_size);
    state.set(
        DATA_DISKS,
        template
            .data_disks
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>(),
    );
    state.set(ORDERLY_SECURITY_GROUP_IDS, template.security_group_ids.clone());
    state.set(
        SECURITY_GROUP_IDS,
        template
            .security_group_ids
            .iter()
            .cloned()
            .collect::<BTreeSet<_>>(),
    );
    state.set_opt(INTERNET_CHARGE_TYPE, template.internet_charge_type.clone());
    state.set_opt(INTERNET_MAX_BANDWIDTH_OUT, template.internet_max_bandwidth_out);
    state.set_opt(PUBLIC_IP_ASSIGNED, template.public_ip_assigned);
    state.set_opt(INSTANCE_CHARGE_TYPE, template.instance_charge_type.clone());

    let group = &scaling_group.attributes;
    state.set_opt(SCALING_GROUP_NAME, group.scaling_group_name.clone());
    state.set(SUBNET_IDS, group.subnet_ids.clone());
    state.set(ZONES, group.zones.clone());
    state.set(TERMINATION_POLICIES, group.termination_policies.clone());
    state.set_opt(RETRY_POLICY, group.retry_policy.clone());
    state.set_opt(MULTI_ZONE_SUBNET_POLICY, group.multi_zone_subnet_policy.clone());
    state.set_opt(DEFAULT_COOLDOWN, group.default_cooldown);
    state.set_opt(SCALING_MODE, group.scaling_mode.clone());

    state.set(TAGS, description.tags.clone());

    state.set(LAUNCH_CONFIG_ID, launch_configuration.launch_configuration_id.as_str());
    state.set(AUTOSCALING_GROUP_ID, scaling_group.autoscaling_group_id.as_str());
    state.set(STATUS, description.life_state.as_str());
    state.set(NODE_COUNT, description.node_count);

    state
}

/// The canonical state of a node pool as the caller should store it.
///
/// Backend defaults the user never declared are dropped. While auto scaling is on, the backend moves the desired
/// capacity by itself, so the last declared value is reported instead of the live one.
pub(crate) fn canonical_state(
    description: &NodePoolDescription,
    launch_configuration: &LaunchConfiguration,
    scaling_group: &ScalingGroup,
    known: &StateSnapshot,
    context: ImportContext,
) -> CanonicalState {
    let complete = merge(description, launch_configuration, scaling_group);
    let mut state = readback::mask_unspecified(NODE_POOL_FIELDS, complete, known, context);

    if let Some(keep_instance) = known.get_bool(DELETE_KEEP_INSTANCE) {
        state.set(DELETE_KEEP_INSTANCE, keep_instance);
    }

    if description.attributes.enable_auto_scale && !context.is_import() {
        if let Some(desired_capacity) = known.get_int(DESIRED_CAPACITY) {
            state.set(DESIRED_CAPACITY, desired_capacity);
        }
    }

    state
}
