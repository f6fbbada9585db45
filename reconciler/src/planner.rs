//! Turns a change between two declared states into an ordered list of backend operations.
use crate::error::{self, Error, ResourceKind, Result};

use models::backend::IdempotencyToken;
use models::nodepool::Capacity;
use models::state::{field_spec, ChangeSet, FieldKind, FieldSpec, TargetService};

use snafu::ensure;
use std::fmt;
use tracing::{event, Level};

/// A single backend operation a plan can contain.
pub trait Operation: fmt::Debug + Send + Sync {
    /// The backend operation name, used in logs and errors.
    fn name(&self) -> &'static str;
    fn target_service(&self) -> TargetService;
    /// Whether the operation creates a resource and must therefore carry an idempotency token.
    fn creates_resource(&self) -> bool {
        false
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlannedOperation<O: Operation> {
    pub operation: O,
    pub idempotency_token: Option<IdempotencyToken>,
}

impl<O: Operation> PlannedOperation<O> {
    pub fn name(&self) -> &'static str {
        self.operation.name()
    }

    pub fn target_service(&self) -> TargetService {
        self.operation.target_service()
    }
}

/// Operations to run strictly in order; later operations may depend on ids returned by earlier ones.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperationPlan<O: Operation> {
    operations: Vec<PlannedOperation<O>>,
}

impl<O: Operation> Default for OperationPlan<O> {
    fn default() -> Self {
        OperationPlan {
            operations: Vec::new(),
        }
    }
}

impl<O: Operation> OperationPlan<O> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an operation, minting an idempotency token for it if it creates a resource.
    pub fn push(&mut self, operation: O) {
        let idempotency_token = operation.creates_resource().then(IdempotencyToken::generate);
        self.operations.push(PlannedOperation {
            operation,
            idempotency_token,
        });
    }

    pub fn extend<I: IntoIterator<Item = O>>(&mut self, operations: I) {
        operations.into_iter().for_each(|operation| self.push(operation));
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlannedOperation<O>> {
        self.operations.iter()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.iter().map(PlannedOperation::name).collect()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

impl<O: Operation> IntoIterator for OperationPlan<O> {
    type Item = PlannedOperation<O>;
    type IntoIter = std::vec::IntoIter<PlannedOperation<O>>;

    fn into_iter(self) -> Self::IntoIter {
        self.operations.into_iter()
    }
}

/// Rejects a change set that touches any immutable field. Checked before anything else is planned, so a rejected
/// change never produces operations.
pub fn reject_immutable(kind: ResourceKind, schema: &[FieldSpec], changes: &ChangeSet) -> Result<()> {
    match changes
        .iter()
        .find(|field| field_spec(schema, field).map(|spec| spec.kind) == Some(FieldKind::Immutable))
    {
        Some(field) => error::ImmutableFieldSnafu { kind, field }.fail(),
        None => Ok(()),
    }
}

/// Whether a change set touches any field applied by `service`.
pub fn touches_service(schema: &[FieldSpec], changes: &ChangeSet, service: TargetService) -> bool {
    changes
        .iter()
        .any(|field| field_spec(schema, field).and_then(|spec| spec.service) == Some(service))
}

/// A declared capacity. The desired capacity may be left to the backend.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CapacityTarget {
    pub min_size: i64,
    pub desired_capacity: Option<i64>,
    pub max_size: i64,
}

impl CapacityTarget {
    pub fn validate(&self, kind: ResourceKind) -> Result<()> {
        let desired_in_bounds = self
            .desired_capacity
            .map(|desired| self.min_size <= desired && desired <= self.max_size)
            .unwrap_or(true);
        ensure!(
            0 <= self.min_size && self.min_size <= self.max_size && desired_in_bounds,
            error::InvalidCapacitySnafu {
                kind,
                min_size: self.min_size,
                desired_capacity: self.desired_capacity,
                max_size: self.max_size,
            }
        );
        Ok(())
    }
}

/// One capacity write.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CapacityStep {
    Bounds { min_size: i64, max_size: i64 },
    Desired { desired_capacity: i64 },
}

/// Orders the capacity writes that move a pool from `current` to `target`.
///
/// Bounds and desired capacity are separate backend writes and every write must leave the pool satisfying
/// `min <= desired <= max`. When neither order of the two writes keeps that true, the bounds are first widened to
/// cover both ranges, then the desired capacity is set, then the bounds are narrowed.
///
/// `current` is the capacity the backend reports right now. A target that leaves the desired capacity to the
/// backend still moves the current desired capacity into the new bounds, since the backend would otherwise reject
/// the bounds. `current` is `None` only when the backend's capacity is not known, in which case bounds go first and
/// the backend validates the result.
pub fn plan_capacity(current: Option<Capacity>, target: CapacityTarget) -> Vec<CapacityStep> {
    let bounds = |min_size, max_size| CapacityStep::Bounds { min_size, max_size };
    let desired = |desired_capacity| CapacityStep::Desired { desired_capacity };

    let current = match current {
        Some(current) => current,
        None => {
            return std::iter::once(bounds(target.min_size, target.max_size))
                .chain(target.desired_capacity.map(desired))
                .collect()
        }
    };

    let bounds_changed = current.min_size != target.min_size || current.max_size != target.max_size;
    let target_desired = target
        .desired_capacity
        .unwrap_or_else(|| current.desired_capacity.max(target.min_size).min(target.max_size));
    let target_desired = Some(target_desired).filter(|desired| *desired != current.desired_capacity);

    match (bounds_changed, target_desired) {
        (false, None) => vec![],
        (true, None) => vec![bounds(target.min_size, target.max_size)],
        (false, Some(target_desired)) => vec![desired(target_desired)],
        (true, Some(target_desired)) => {
            if target.min_size <= current.desired_capacity && current.desired_capacity <= target.max_size {
                vec![bounds(target.min_size, target.max_size), desired(target_desired)]
            } else if current.min_size <= target_desired && target_desired <= current.max_size {
                vec![desired(target_desired), bounds(target.min_size, target.max_size)]
            } else {
                vec![
                    bounds(
                        current.min_size.min(target.min_size),
                        current.max_size.max(target.max_size),
                    ),
                    desired(target_desired),
                    bounds(target.min_size, target.max_size),
                ]
            }
        }
    }
}

/// Tracks which operations of a plan have been committed, so a failure can report what was left applied.
#[derive(Debug)]
pub struct PlanRun {
    kind: ResourceKind,
    committed: Vec<String>,
}

impl PlanRun {
    pub fn new(kind: ResourceKind) -> Self {
        PlanRun {
            kind,
            committed: Vec::new(),
        }
    }

    pub fn committed(&self) -> &[String] {
        &self.committed
    }

    pub fn record(&mut self, operation: &str) {
        event!(Level::INFO, kind = %self.kind, "Applied '{}'", operation);
        self.committed.push(operation.to_string());
    }

    /// Wraps the failure of `failed`. Nothing is rolled back; if earlier operations were committed the failure
    /// becomes a `PartialApply` naming them.
    pub fn fail(self, failed: &str, source: Error) -> Error {
        if self.committed.is_empty() {
            return source;
        }
        event!(
            Level::ERROR,
            kind = %self.kind,
            "'{}' failed after [{}] were applied; leaving them in place",
            failed,
            self.committed.join(", ")
        );
        Error::PartialApply {
            kind: self.kind,
            failed: failed.to_string(),
            committed: self.committed,
            source: Box::new(source),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use models::nodepool::NODE_POOL_FIELDS;

    fn apply(mut state: Capacity, step: &CapacityStep) -> Capacity {
        match *step {
            CapacityStep::Bounds { min_size, max_size } => {
                state.min_size = min_size;
                state.max_size = max_size;
            }
            CapacityStep::Desired { desired_capacity } => state.desired_capacity = desired_capacity,
        }
        state
    }

    fn consistent_capacities(limit: i64) -> Vec<Capacity> {
        let mut capacities = vec![];
        for min_size in 0..=limit {
            for desired_capacity in min_size..=limit {
                for max_size in desired_capacity..=limit {
                    capacities.push(Capacity::new(min_size, desired_capacity, max_size));
                }
            }
        }
        capacities
    }

    #[test]
    fn test_capacity_plans_never_violate_bounds() {
        let capacities = consistent_capacities(5);
        for current in &capacities {
            for target in &capacities {
                let steps = plan_capacity(
                    Some(*current),
                    CapacityTarget {
                        min_size: target.min_size,
                        desired_capacity: Some(target.desired_capacity),
                        max_size: target.max_size,
                    },
                );
                assert!(steps.len() <= 3);

                let mut state = *current;
                for step in &steps {
                    state = apply(state, step);
                    assert!(
                        state.is_consistent(),
                        "{} -> {} passes through {} via {:?}",
                        current,
                        target,
                        state,
                        steps
                    );
                }
                assert_eq!(state, *target, "{:?}", steps);
            }
        }
    }

    #[test]
    fn test_unmanaged_desired_plans_never_violate_bounds() {
        let capacities = consistent_capacities(5);
        for current in &capacities {
            for target in &capacities {
                let steps = plan_capacity(
                    Some(*current),
                    CapacityTarget {
                        min_size: target.min_size,
                        desired_capacity: None,
                        max_size: target.max_size,
                    },
                );

                let mut state = *current;
                for step in &steps {
                    state = apply(state, step);
                    assert!(state.is_consistent(), "{} -> {:?} passes through {}", current, steps, state);
                }
                assert_eq!((state.min_size, state.max_size), (target.min_size, target.max_size));
                assert_eq!(
                    state.desired_capacity,
                    current.desired_capacity.max(target.min_size).min(target.max_size)
                );
            }
        }
    }

    #[test]
    fn test_desired_raised_before_min() {
        let steps = plan_capacity(
            Some(Capacity::new(1, 2, 6)),
            CapacityTarget {
                min_size: 3,
                desired_capacity: Some(5),
                max_size: 6,
            },
        );
        assert_eq!(
            steps,
            vec![
                CapacityStep::Desired { desired_capacity: 5 },
                CapacityStep::Bounds {
                    min_size: 3,
                    max_size: 6
                },
            ]
        );
    }

    #[test]
    fn test_disjoint_ranges_widen_first() {
        let steps = plan_capacity(
            Some(Capacity::new(0, 1, 2)),
            CapacityTarget {
                min_size: 4,
                desired_capacity: Some(5),
                max_size: 6,
            },
        );
        assert_eq!(
            steps,
            vec![
                CapacityStep::Bounds {
                    min_size: 0,
                    max_size: 6
                },
                CapacityStep::Desired { desired_capacity: 5 },
                CapacityStep::Bounds {
                    min_size: 4,
                    max_size: 6
                },
            ]
        );
    }

    #[test]
    fn test_unmanaged_desired_capacity() {
        let target = CapacityTarget {
            min_size: 2,
            desired_capacity: None,
            max_size: 8,
        };
        assert_eq!(
            plan_capacity(Some(Capacity::new(1, 3, 6)), target),
            vec![CapacityStep::Bounds {
                min_size: 2,
                max_size: 8
            }]
        );
        assert_eq!(
            plan_capacity(None, target),
            vec![CapacityStep::Bounds {
                min_size: 2,
                max_size: 8
            }]
        );
        assert!(plan_capacity(Some(Capacity::new(2, 3, 8)), target).is_empty());

        let raised_min = CapacityTarget {
            min_size: 3,
            desired_capacity: None,
            max_size: 6,
        };
        assert_eq!(
            plan_capacity(Some(Capacity::new(1, 1, 6)), raised_min),
            vec![
                CapacityStep::Desired { desired_capacity: 3 },
                CapacityStep::Bounds {
                    min_size: 3,
                    max_size: 6
                },
            ]
        );
    }

    #[test]
    fn test_capacity_validation() {
        let valid = CapacityTarget {
            min_size: 1,
            desired_capacity: Some(4),
            max_size: 6,
        };
        assert!(valid.validate(ResourceKind::NodePool).is_ok());

        for invalid in [
            CapacityTarget {
                min_size: 3,
                desired_capacity: Some(2),
                max_size: 6,
            },
            CapacityTarget {
                min_size: 4,
                desired_capacity: None,
                max_size: 2,
            },
            CapacityTarget {
                min_size: -1,
                desired_capacity: None,
                max_size: 2,
            },
        ] {
            assert!(matches!(
                invalid.validate(ResourceKind::NodePool),
                Err(Error::InvalidCapacity { .. })
            ));
        }
    }

    #[test]
    fn test_immutable_fields_are_rejected() {
        let changes = ChangeSet::from_fields(vec!["max_size", "vpc_id", "name"]);
        match reject_immutable(ResourceKind::NodePool, NODE_POOL_FIELDS, &changes) {
            Err(Error::ImmutableField { field, .. }) => assert_eq!(field, "vpc_id"),
            other => panic!("expected an immutable field violation, got {:?}", other),
        }

        let changes = ChangeSet::from_fields(vec!["max_size", "delete_keep_instance"]);
        assert!(reject_immutable(ResourceKind::NodePool, NODE_POOL_FIELDS, &changes).is_ok());
    }

    #[test]
    fn test_partial_failures_name_committed_operations() {
        let failure = || error::NotFoundSnafu {
            kind: ResourceKind::NodePool,
            resource_id: "cls-1#np-1",
        }
        .build();

        let run = PlanRun::new(ResourceKind::NodePool);
        assert!(matches!(
            run.fail("ModifyNodePool", failure()),
            Error::NotFound { .. }
        ));

        let mut run = PlanRun::new(ResourceKind::NodePool);
        run.record("UpgradeLaunchConfiguration");
        match run.fail("ModifyNodePool", failure()) {
            Error::PartialApply {
                failed, committed, ..
            } => {
                assert_eq!(failed, "ModifyNodePool");
                assert_eq!(committed, vec!["UpgradeLaunchConfiguration".to_string()]);
            }
            other => panic!("expected a partial apply failure, got {:?}", other),
        }
    }
}
