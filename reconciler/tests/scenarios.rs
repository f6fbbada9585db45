use maplit::btreemap;
use mockall::{predicate, Sequence};
use models::addon::fields as addon_fields;
use models::addon::{AddonDescription, AddonPhase, MockAddonBackend};
use models::identity::{self, AddonId, FormatError, NodePoolId};
use models::nodepool::fields::*;
use models::nodepool::{
    Capacity, CreateNodePoolRequest, LaunchConfiguration, LaunchTemplate, LoginSettings, MockNodePoolBackend,
    NodePoolAttributes, NodePoolDescription, NodePoolLifeState, ScalingGroup, ScalingGroupAttributes,
    NODE_POOL_FIELDS,
};
use models::state::{ChangeSet, ImportContext, StateSnapshot};
use models::tag::MockTagBackend;
use reconciler::nodepool::plan::plan_create;
use reconciler::{AddonResource, CompositeResource, CurrentState, Error, NodePoolResource, ReconcilerConfig};

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn node_pool() -> NodePoolDescription {
    NodePoolDescription {
        cluster_id: "cls-1".to_string(),
        node_pool_id: "np-1".to_string(),
        life_state: NodePoolLifeState::Normal,
        attributes: NodePoolAttributes {
            name: "pool-a".to_string(),
            enable_auto_scale: true,
            node_os: Some("tlinux3.1x86_64".to_string()),
            ..Default::default()
        },
        launch_configuration_id: "asc-1".to_string(),
        autoscaling_group_id: "asg-1".to_string(),
        node_count: 4,
        tags: btreemap! {},
    }
}

fn launch_configuration() -> LaunchConfiguration {
    LaunchConfiguration {
        launch_configuration_id: "asc-1".to_string(),
        template: LaunchTemplate {
            instance_type: "S5.MEDIUM4".to_string(),
            system_disk_type: Some("CLOUD_PREMIUM".to_string()),
            system_disk_size: Some(50),
            security_group_ids: vec!["sg-default".to_string()],
            internet_charge_type: Some("TRAFFIC_POSTPAID_BY_HOUR".to_string()),
            ..Default::default()
        },
        login_settings: LoginSettings {
            key_ids: vec![],
            enhanced_security_service: true,
            enhanced_monitor_service: true,
        },
    }
}

fn scaling_group(capacity: Capacity) -> ScalingGroup {
    ScalingGroup {
        autoscaling_group_id: "asg-1".to_string(),
        vpc_id: "vpc-1".to_string(),
        capacity,
        attributes: ScalingGroupAttributes {
            scaling_group_name: Some("tke-np-1".to_string()),
            subnet_ids: vec!["subnet-1".to_string()],
            zones: vec!["ap-guangzhou-3".to_string()],
            termination_policies: vec!["OLDEST_INSTANCE".to_string()],
            retry_policy: Some("IMMEDIATE_RETRY".to_string()),
            ..Default::default()
        },
    }
}

/// A pool that leaves its desired capacity to the backend.
fn pool_with_bounds(min_size: i64, max_size: i64) -> StateSnapshot {
    StateSnapshot::new()
        .with(CLUSTER_ID, "cls-1")
        .with(VPC_ID, "vpc-1")
        .with(NAME, "pool-a")
        .with(MIN_SIZE, min_size)
        .with(MAX_SIZE, max_size)
        .with(INSTANCE_TYPE, "S5.MEDIUM4")
        .with(SUBNET_IDS, vec!["subnet-1".to_string()])
}

fn declared_pool(min_size: i64, desired_capacity: i64, max_size: i64) -> StateSnapshot {
    pool_with_bounds(min_size, max_size).with(DESIRED_CAPACITY, desired_capacity)
}

fn recorded(state: StateSnapshot) -> CurrentState {
    CurrentState::new(
        "cls-1#np-1",
        state.with(LAUNCH_CONFIG_ID, "asc-1").with(AUTOSCALING_GROUP_ID, "asg-1"),
    )
}

/// Backs the scaling group with a capacity that follows every write, and returns each capacity it passes through.
fn tracked_capacity(backend: &mut MockNodePoolBackend, live: Capacity) -> Arc<Mutex<Vec<Capacity>>> {
    let capacity = Arc::new(Mutex::new(live));
    let history = Arc::new(Mutex::new(vec![]));

    let (current, seen) = (capacity.clone(), history.clone());
    backend
        .expect_modify_capacity_bounds()
        .returning(move |_, min_size, max_size| {
            let mut current = current.lock().unwrap();
            current.min_size = min_size;
            current.max_size = max_size;
            seen.lock().unwrap().push(*current);
            Ok(())
        });
    let (current, seen) = (capacity.clone(), history.clone());
    backend
        .expect_modify_desired_capacity()
        .returning(move |_, desired_capacity| {
            let mut current = current.lock().unwrap();
            current.desired_capacity = desired_capacity;
            seen.lock().unwrap().push(*current);
            Ok(())
        });
    backend
        .expect_describe_scaling_group()
        .returning(move |_| Ok(Some(scaling_group(*capacity.lock().unwrap()))));
    backend.expect_describe_node_pool().returning(|_| Ok(Some(node_pool())));
    history
}

fn assert_consistent_writes(history: &Arc<Mutex<Vec<Capacity>>>, expected: Capacity) {
    let history = history.lock().unwrap();
    assert!(
        history.iter().all(Capacity::is_consistent),
        "capacity writes passed through {:?}",
        history
    );
    assert_eq!(history.last(), Some(&expected));
}

#[tokio::test(start_paused = true)]
async fn create_then_read_back_capacity() {
    let desired = declared_pool(1, 4, 6);
    let plan = plan_create(&desired).unwrap();
    assert_eq!(plan.iter().filter(|op| op.operation.touches_capacity()).count(), 1);

    let created = Arc::new(Mutex::new(None::<Capacity>));
    let mut backend = MockNodePoolBackend::new();
    let recorded = created.clone();
    backend
        .expect_create_node_pool()
        .returning(move |request: &CreateNodePoolRequest, _| {
            if let Ok(mut created) = recorded.lock() {
                *created = Some(request.capacity);
            }
            Ok(NodePoolId::new("cls-1", "np-1"))
        })
        .times(1);
    backend.expect_describe_node_pool().returning(|_| Ok(Some(node_pool())));
    backend
        .expect_describe_launch_configuration()
        .returning(|_| Ok(Some(launch_configuration())));
    let capacity = created.clone();
    backend.expect_describe_scaling_group().returning(move |_| {
        let capacity = capacity.lock().ok().and_then(|c| *c).unwrap_or_default();
        Ok(Some(scaling_group(capacity)))
    });

    let resource = NodePoolResource::new(backend, MockTagBackend::new(), &ReconcilerConfig::default());
    let id = resource.apply(None, &desired).await.unwrap();
    assert_eq!(id, "cls-1#np-1");

    let state = resource.read(&id, &desired, ImportContext::Refresh).await.unwrap();
    assert_eq!(state.get_int(DESIRED_CAPACITY), Some(4));
    assert_eq!(state.get_int(MIN_SIZE), Some(1));
    assert_eq!(state.get_int(MAX_SIZE), Some(6));
}

#[tokio::test(start_paused = true)]
async fn raising_min_raises_desired_first() {
    let mut seq = Sequence::new();
    let mut backend = MockNodePoolBackend::new();
    backend
        .expect_modify_desired_capacity()
        .with(predicate::always(), predicate::eq(5))
        .returning(|_, _| Ok(()))
        .times(1)
        .in_sequence(&mut seq);
    backend
        .expect_modify_capacity_bounds()
        .with(predicate::always(), predicate::eq(3), predicate::eq(6))
        .returning(|_, _, _| Ok(()))
        .times(1)
        .in_sequence(&mut seq);
    backend
        .expect_describe_node_pool()
        .returning(|_| Ok(Some(node_pool())));
    backend
        .expect_describe_scaling_group()
        .returning(|_| Ok(Some(scaling_group(Capacity::new(1, 2, 6)))));

    let current = recorded(declared_pool(1, 2, 6));
    let resource = NodePoolResource::new(backend, MockTagBackend::new(), &ReconcilerConfig::default());
    let id = resource
        .apply(Some(&current), &declared_pool(3, 5, 6))
        .await
        .unwrap();
    assert_eq!(id, "cls-1#np-1");
}

#[tokio::test(start_paused = true)]
async fn capacity_writes_follow_the_auto_scaled_desired_capacity() {
    // Auto scaling has moved the desired capacity from the stored 2 to 5.
    let mut backend = MockNodePoolBackend::new();
    let history = tracked_capacity(&mut backend, Capacity::new(1, 5, 6));

    let resource = NodePoolResource::new(backend, MockTagBackend::new(), &ReconcilerConfig::default());
    resource
        .apply(Some(&recorded(declared_pool(1, 2, 6))), &declared_pool(1, 3, 3))
        .await
        .unwrap();

    assert_consistent_writes(&history, Capacity::new(1, 3, 3));
}

#[tokio::test(start_paused = true)]
async fn raising_min_moves_an_unmanaged_desired_capacity() {
    let mut backend = MockNodePoolBackend::new();
    let history = tracked_capacity(&mut backend, Capacity::new(1, 1, 6));

    let resource = NodePoolResource::new(backend, MockTagBackend::new(), &ReconcilerConfig::default());
    resource
        .apply(Some(&recorded(pool_with_bounds(1, 6))), &pool_with_bounds(3, 6))
        .await
        .unwrap();

    assert_consistent_writes(&history, Capacity::new(3, 3, 6));
}

#[tokio::test(start_paused = true)]
async fn immutable_change_makes_no_calls() {
    let current = CurrentState::new("cls-1#np-1", declared_pool(1, 2, 6));
    let desired = declared_pool(1, 3, 6).with(VPC_ID, "vpc-2");

    let resource = NodePoolResource::new(
        MockNodePoolBackend::new(),
        MockTagBackend::new(),
        &ReconcilerConfig::default(),
    );
    let error = resource.apply(Some(&current), &desired).await.unwrap_err();
    assert!(error.requires_recreation());
    assert!(matches!(error, Error::ImmutableField { ref field, .. } if field == VPC_ID));
}

#[tokio::test(start_paused = true)]
async fn unset_backend_defaults_are_not_drift() {
    let mut backend = MockNodePoolBackend::new();
    backend.expect_describe_node_pool().returning(|_| Ok(Some(node_pool())));
    backend
        .expect_describe_launch_configuration()
        .returning(|_| Ok(Some(launch_configuration())));
    backend
        .expect_describe_scaling_group()
        .returning(|_| Ok(Some(scaling_group(Capacity::new(1, 5, 6)))));

    let declared = declared_pool(1, 4, 6);
    let resource = NodePoolResource::new(backend, MockTagBackend::new(), &ReconcilerConfig::default());
    let state = resource
        .read("cls-1#np-1", &declared, ImportContext::Refresh)
        .await
        .unwrap();
    assert!(ChangeSet::between(NODE_POOL_FIELDS, &state, &declared).is_empty());

    let imported = resource.import_from("cls-1#np-1").await.unwrap();
    assert_eq!(imported.get_int(DESIRED_CAPACITY), Some(5));
    assert_eq!(imported.get_str(RETRY_POLICY), Some("IMMEDIATE_RETRY"));
    assert!(!ChangeSet::between(NODE_POOL_FIELDS, &imported, &declared).is_empty());
}

#[tokio::test(start_paused = true)]
async fn failed_addon_creation_removes_the_addon() {
    let phases = ["CREATING", "CREATING", "FAILED"];
    let describes = Arc::new(AtomicUsize::new(0));
    let deleted = Arc::new(AtomicBool::new(false));

    let mut backend = MockAddonBackend::new();
    backend.expect_create_addon().returning(|_, _, _| Ok(())).times(1);
    let (count, gone) = (describes.clone(), deleted.clone());
    backend.expect_describe_addon().returning(move |_| {
        if gone.load(Ordering::SeqCst) {
            return Ok(None);
        }
        let n = count.fetch_add(1, Ordering::SeqCst).min(phases.len() - 1);
        Ok(Some(AddonDescription {
            addon_name: "tcr".to_string(),
            version: Some("1.0.0".to_string()),
            values: vec![],
            phase: AddonPhase::from(phases[n]),
            reason: Some("release tcr failed: timed out waiting for the condition".to_string()),
            request_body: None,
            response_body: "{}".to_string(),
        }))
    });
    let marker = deleted.clone();
    backend
        .expect_delete_addon()
        .with(predicate::eq(AddonId::new("cls-1", "tcr")))
        .returning(move |_| {
            marker.store(true, Ordering::SeqCst);
            Ok(())
        })
        .times(1);

    let desired = StateSnapshot::new()
        .with(addon_fields::CLUSTER_ID, "cls-1")
        .with(addon_fields::NAME, "tcr")
        .with(addon_fields::VERSION, "1.0.0");
    let resource = AddonResource::new(backend, &ReconcilerConfig::default());
    match resource.apply(None, &desired).await {
        Err(Error::AsyncApply {
            phase,
            status_message,
            ..
        }) => {
            assert_eq!(phase, "Failed");
            assert_eq!(
                status_message.as_deref(),
                Some("release tcr failed: timed out waiting for the condition")
            );
        }
        other => panic!("expected an async apply failure, got {:?}", other),
    }
    assert_eq!(describes.load(Ordering::SeqCst), 3);

    let read = resource
        .read("cls-1#tcr", &desired, ImportContext::Refresh)
        .await;
    assert!(read.unwrap_err().is_not_found());
}

#[test]
fn decoding_with_extra_parts_fails() {
    assert!(matches!(
        identity::decode("a#b#c", 2),
        Err(FormatError::WrongArity { expected: 2, actual: 3, .. })
    ));
    assert!("a#b#c".parse::<NodePoolId>().is_err());
}
