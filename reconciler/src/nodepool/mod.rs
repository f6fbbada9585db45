//! Node pools: a cluster node pool together with the launch configuration and auto scaling group it owns.
mod payload;
pub mod plan;
mod readback;

use self::plan::{LiveNodePool, NodePoolOperation};
use crate::config::ReconcilerConfig;
use crate::deadline::Deadline;
use crate::error::{self, ResourceKind, Result};
use crate::executor::{CallKind, Executor};
use crate::planner::{self, Operation, PlanRun};
use crate::poller::{PollResult, Poller};
use crate::readback::CanonicalState;
use crate::resource::{CompositeResource, CurrentState};

use models::backend::IdempotencyToken;
use models::constants::{CLUSTER_RESOURCE_TYPE, NODE_POOL_RESOURCE_SEGMENT, TAG_SERVICE};
use models::identity::NodePoolId;
use models::nodepool::fields::{AUTOSCALING_GROUP_ID, CLUSTER_ID, DELETE_KEEP_INSTANCE, LAUNCH_CONFIG_ID};
use models::nodepool::{
    CreateNodePoolRequest, LaunchConfiguration, NodePoolBackend, NodePoolDescription, NodePoolLifeState,
    ScalingGroup, NODE_POOL_FIELDS,
};
use models::phase::{Observation, PhaseClass};
use models::state::{ChangeSet, DesiredState, ImportContext, StateSnapshot, TargetService};
use models::tag::{TagBackend, TagResource};

use async_trait::async_trait;
use snafu::{ensure, OptionExt, ResultExt};
use tokio::time::Duration;
use tracing::{event, instrument, Level};

const KIND: ResourceKind = ResourceKind::NodePool;

const DESCRIBE_NODE_POOL: &str = "DescribeClusterNodePoolDetail";
const DESCRIBE_LAUNCH_CONFIGURATION: &str = "DescribeLaunchConfigurations";
const DESCRIBE_SCALING_GROUP: &str = "DescribeAutoScalingGroups";
const DELETE_NODE_POOL: &str = "DeleteClusterNodePool";
const WAIT_FOR_UPDATE: &str = "ModifyClusterNodePool";

/// The backend resources one node pool is made of.
#[derive(Clone, Debug, Eq, PartialEq)]
struct Members {
    pool: NodePoolId,
    launch_configuration_id: String,
    autoscaling_group_id: String,
}

impl Members {
    /// Takes the dependent ids from a description of the pool.
    fn discover(pool: NodePoolId, external_id: &str, description: &NodePoolDescription) -> Result<Self> {
        let dependent_id = |id: &str, dependent: &str| -> Result<String> {
            ensure!(
                !id.is_empty(),
                error::MissingDependentIdSnafu {
                    kind: KIND,
                    resource_id: external_id,
                    dependent,
                }
            );
            Ok(id.to_string())
        };
        Ok(Members {
            launch_configuration_id: dependent_id(&description.launch_configuration_id, "launch configuration")?,
            autoscaling_group_id: dependent_id(&description.autoscaling_group_id, "auto scaling group")?,
            pool,
        })
    }

    /// Takes the dependent ids recorded by the last read, if both are there.
    fn recorded(pool: &NodePoolId, state: &StateSnapshot) -> Option<Self> {
        let recorded = |field| state.get_str(field).filter(|id| !id.is_empty()).map(str::to_string);
        Some(Members {
            pool: pool.clone(),
            launch_configuration_id: recorded(LAUNCH_CONFIG_ID)?,
            autoscaling_group_id: recorded(AUTOSCALING_GROUP_ID)?,
        })
    }

    fn tag_resource(&self) -> TagResource {
        TagResource::new(
            TAG_SERVICE,
            CLUSTER_RESOURCE_TYPE,
            format!(
                "{}/{}/{}",
                self.pool.cluster_id, NODE_POOL_RESOURCE_SEGMENT, self.pool.node_pool_id
            ),
        )
    }
}

fn parse_id(external_id: &str) -> Result<NodePoolId> {
    external_id
        .parse::<NodePoolId>()
        .context(error::IdentitySnafu { kind: KIND })
}

/// Reconciles node pools through a node pool backend and a tag backend.
#[derive(Clone, Debug)]
pub struct NodePoolResource<B: NodePoolBackend, T: TagBackend> {
    backend: B,
    tags: T,
    executor: Executor,
    poller: Poller,
    operation_timeout: Duration,
}

impl<B: NodePoolBackend, T: TagBackend> NodePoolResource<B, T> {
    pub fn new(backend: B, tags: T, config: &ReconcilerConfig) -> Self {
        NodePoolResource {
            backend,
            tags,
            executor: Executor::new(KIND, config),
            poller: Poller::new(KIND, config),
            operation_timeout: config.operation_timeout,
        }
    }

    fn deadline(&self) -> Deadline {
        Deadline::after(self.operation_timeout)
    }

    /// Describes the pool; a pool the backend does not know reads as `None`.
    async fn describe(&self, pool: &NodePoolId, deadline: &Deadline) -> Result<Option<NodePoolDescription>> {
        let backend = &self.backend;
        let described = self
            .executor
            .execute(DESCRIBE_NODE_POOL, CallKind::Read, deadline, pool, move || {
                backend.describe_node_pool(pool)
            })
            .await;
        match described {
            Err(e) if e.is_not_found() => Ok(None),
            described => described,
        }
    }

    async fn describe_launch_configuration(
        &self,
        launch_configuration_id: &str,
        deadline: &Deadline,
    ) -> Result<Option<LaunchConfiguration>> {
        let backend = &self.backend;
        let described = self
            .executor
            .execute(
                DESCRIBE_LAUNCH_CONFIGURATION,
                CallKind::Read,
                deadline,
                launch_configuration_id,
                move || backend.describe_launch_configuration(launch_configuration_id),
            )
            .await;
        match described {
            Err(e) if e.is_not_found() => Ok(None),
            described => described,
        }
    }

    async fn describe_scaling_group(
        &self,
        autoscaling_group_id: &str,
        deadline: &Deadline,
    ) -> Result<Option<ScalingGroup>> {
        let backend = &self.backend;
        let described = self
            .executor
            .execute(
                DESCRIBE_SCALING_GROUP,
                CallKind::Read,
                deadline,
                autoscaling_group_id,
                move || backend.describe_scaling_group(autoscaling_group_id),
            )
            .await;
        match described {
            Err(e) if e.is_not_found() => Ok(None),
            described => described,
        }
    }

    /// Polls the pool's life state until `classify` reports a terminal phase. A pool that disappears reads as
    /// `deleted`.
    async fn wait_for<C>(
        &self,
        pool: &NodePoolId,
        external_id: &str,
        operation: &str,
        deadline: &Deadline,
        classify: C,
    ) -> Result<PollResult<NodePoolLifeState>>
    where
        C: Fn(&NodePoolLifeState) -> PhaseClass + Send + Sync,
    {
        let polled = self
            .poller
            .poll_until(
                external_id,
                operation,
                deadline,
                move || async move {
                    let observation = match self.describe(pool, deadline).await? {
                        Some(description) => Observation::new(description.life_state),
                        None => Observation::with_message(NodePoolLifeState::Deleted, Some("node pool no longer exists")),
                    };
                    Ok::<_, error::Error>(observation)
                },
                classify,
            )
            .await?;
        polled.into_result(KIND, external_id, operation)
    }

    /// Creates the pool and waits for it to become ready, then looks up what it is made of.
    async fn provision(
        &self,
        operation: &str,
        request: &CreateNodePoolRequest,
        token: &IdempotencyToken,
        deadline: &Deadline,
    ) -> Result<Members> {
        let backend = &self.backend;
        let pool = self
            .executor
            .execute(operation, CallKind::Write, deadline, request, move || {
                backend.create_node_pool(request, token)
            })
            .await?;
        let external_id = pool.encode().context(error::IdentitySnafu { kind: KIND })?;
        event!(Level::INFO, %external_id, "Node pool created, waiting for it to become ready");

        self.wait_for(
            &pool,
            &external_id,
            operation,
            deadline,
            NodePoolLifeState::provisioning_class,
        )
        .await?;

        let description = self
            .describe(&pool, deadline)
            .await?
            .context(error::NotFoundSnafu {
                kind: KIND,
                resource_id: external_id.as_str(),
            })?;
        Members::discover(pool, &external_id, &description)
    }

    /// Applies one planned operation to an existing pool.
    async fn run(&self, members: &Members, operation: &NodePoolOperation, deadline: &Deadline) -> Result<()> {
        let backend = &self.backend;
        let pool = &members.pool;
        let name = operation.name();
        match operation {
            NodePoolOperation::CreateNodePool(_) => error::UnexpectedOperationSnafu {
                kind: KIND,
                operation: name,
            }
            .fail(),
            NodePoolOperation::UpgradeLaunchConfiguration(template) => {
                let launch_configuration_id = members.launch_configuration_id.as_str();
                self.executor
                    .execute(name, CallKind::Write, deadline, operation, move || {
                        backend.upgrade_launch_configuration(launch_configuration_id, template)
                    })
                    .await
            }
            NodePoolOperation::SetCapacityBounds { min_size, max_size } => {
                let (min_size, max_size) = (*min_size, *max_size);
                self.executor
                    .execute(name, CallKind::Write, deadline, operation, move || {
                        backend.modify_capacity_bounds(pool, min_size, max_size)
                    })
                    .await
            }
            NodePoolOperation::SetDesiredCapacity { desired_capacity } => {
                let desired_capacity = *desired_capacity;
                self.executor
                    .execute(name, CallKind::Write, deadline, operation, move || {
                        backend.modify_desired_capacity(pool, desired_capacity)
                    })
                    .await
            }
            NodePoolOperation::ModifyNodePool(attributes) => {
                self.executor
                    .execute(name, CallKind::Write, deadline, operation, move || {
                        backend.modify_node_pool(pool, attributes)
                    })
                    .await
            }
            NodePoolOperation::ModifyScalingGroup(attributes) => {
                let autoscaling_group_id = members.autoscaling_group_id.as_str();
                self.executor
                    .execute(name, CallKind::Write, deadline, operation, move || {
                        backend.modify_scaling_group(autoscaling_group_id, attributes)
                    })
                    .await
            }
            NodePoolOperation::ModifyTags(diff) => {
                let resource = members.tag_resource();
                let (tags, resource) = (&self.tags, &resource);
                self.executor
                    .execute(name, CallKind::Write, deadline, operation, move || {
                        tags.modify_tags(resource, diff)
                    })
                    .await
            }
        }
    }

    async fn create(&self, desired: &DesiredState, deadline: &Deadline) -> Result<String> {
        let plan = plan::plan_create(desired)?;
        let mut run = PlanRun::new(KIND);
        let mut members: Option<Members> = None;

        for planned in plan {
            let name = planned.name();
            let result = match planned.operation {
                NodePoolOperation::CreateNodePool(request) => {
                    let token = planned
                        .idempotency_token
                        .unwrap_or_else(IdempotencyToken::generate);
                    self.provision(name, &request, &token, deadline)
                        .await
                        .map(|created| members = Some(created))
                }
                operation => match &members {
                    Some(members) => self.run(members, &operation, deadline).await,
                    None => error::UnexpectedOperationSnafu {
                        kind: KIND,
                        operation: name,
                    }
                    .fail(),
                },
            };
            match result {
                Ok(()) => run.record(name),
                Err(e) => return Err(run.fail(name, e)),
            }
        }

        let members = members.context(error::MissingDependentIdSnafu {
            kind: KIND,
            resource_id: desired.get_str(CLUSTER_ID).unwrap_or_default(),
            dependent: "node pool",
        })?;
        members.pool.encode().context(error::IdentitySnafu { kind: KIND })
    }

    /// Finds the members of an existing pool, from the ids recorded by the last read when possible.
    async fn members(
        &self,
        pool: &NodePoolId,
        external_id: &str,
        state: &StateSnapshot,
        deadline: &Deadline,
    ) -> Result<Members> {
        if let Some(members) = Members::recorded(pool, state) {
            return Ok(members);
        }
        let description = self
            .describe(pool, deadline)
            .await?
            .context(error::NotFoundSnafu {
                kind: KIND,
                resource_id: external_id,
            })?;
        Members::discover(pool.clone(), external_id, &description)
    }

    /// Reads the pool's current attributes and, if `with_capacity`, its scaling group's capacity.
    async fn observe(
        &self,
        pool: &NodePoolId,
        external_id: &str,
        with_capacity: bool,
        deadline: &Deadline,
    ) -> Result<(Members, LiveNodePool)> {
        let not_found = || error::NotFoundSnafu {
            kind: KIND,
            resource_id: external_id,
        };
        let description = self.describe(pool, deadline).await?.context(not_found())?;
        let members = Members::discover(pool.clone(), external_id, &description)?;
        let capacity = if with_capacity {
            let scaling_group = self
                .describe_scaling_group(&members.autoscaling_group_id, deadline)
                .await?
                .context(not_found())?;
            Some(scaling_group.capacity)
        } else {
            None
        };
        Ok((
            members,
            LiveNodePool {
                capacity,
                attributes: Some(description.attributes),
            },
        ))
    }

    async fn update(&self, current: &CurrentState, desired: &DesiredState, deadline: &Deadline) -> Result<String> {
        let external_id = current.external_id.as_str();
        let pool = parse_id(external_id)?;
        let changes = ChangeSet::between(NODE_POOL_FIELDS, &current.state, desired);
        planner::reject_immutable(KIND, NODE_POOL_FIELDS, &changes)?;

        let touches = |service| planner::touches_service(NODE_POOL_FIELDS, &changes, service);
        let with_capacity = touches(TargetService::Capacity);
        let (observed, live) = if with_capacity || touches(TargetService::Cluster) {
            let (members, live) = self.observe(&pool, external_id, with_capacity, deadline).await?;
            (Some(members), live)
        } else {
            (None, LiveNodePool::default())
        };

        let plan = plan::plan_update(&current.state, desired, &changes, &live)?;
        if plan.is_empty() {
            event!(Level::INFO, %external_id, "Node pool is up to date");
            return Ok(external_id.to_string());
        }
        event!(
            Level::INFO,
            %external_id,
            operations = ?plan.names(),
            "Updating node pool"
        );

        let members = match observed {
            Some(members) => members,
            None => self.members(&pool, external_id, &current.state, deadline).await?,
        };

        let mut run = PlanRun::new(KIND);
        for planned in plan {
            let name = planned.name();
            if let Err(e) = self.run(&members, &planned.operation, deadline).await {
                return Err(run.fail(name, e));
            }
            run.record(name);
        }

        self.wait_for(
            &pool,
            external_id,
            WAIT_FOR_UPDATE,
            deadline,
            NodePoolLifeState::provisioning_class,
        )
        .await?;
        Ok(external_id.to_string())
    }
}

#[async_trait]
impl<B: NodePoolBackend, T: TagBackend> CompositeResource for NodePoolResource<B, T> {
    fn kind(&self) -> ResourceKind {
        KIND
    }

    #[instrument(skip(self, current, desired), err)]
    async fn apply(&self, current: Option<&CurrentState>, desired: &DesiredState) -> Result<String> {
        let deadline = self.deadline();
        match current {
            None => self.create(desired, &deadline).await,
            Some(current) => self.update(current, desired, &deadline).await,
        }
    }

    #[instrument(skip(self, known), err)]
    async fn read(&self, external_id: &str, known: &StateSnapshot, context: ImportContext) -> Result<CanonicalState> {
        let pool = parse_id(external_id)?;
        let deadline = self.deadline();
        let not_found = || error::NotFoundSnafu {
            kind: KIND,
            resource_id: external_id,
        };

        let description = self.describe(&pool, &deadline).await?.context(not_found())?;
        let members = Members::discover(pool, external_id, &description)?;
        let (launch_configuration, scaling_group) = tokio::try_join!(
            self.describe_launch_configuration(&members.launch_configuration_id, &deadline),
            self.describe_scaling_group(&members.autoscaling_group_id, &deadline),
        )?;
        let launch_configuration = launch_configuration.context(not_found())?;
        let scaling_group = scaling_group.context(not_found())?;

        Ok(readback::canonical_state(
            &description,
            &launch_configuration,
            &scaling_group,
            known,
            context,
        ))
    }

    #[instrument(skip(self, known), err)]
    async fn destroy(&self, external_id: &str, known: &StateSnapshot) -> Result<()> {
        let pool = parse_id(external_id)?;
        let deadline = self.deadline();
        let keep_instance = known.get_bool(DELETE_KEEP_INSTANCE).unwrap_or(false);

        let backend = &self.backend;
        let target = &pool;
        match self
            .executor
            .execute(DELETE_NODE_POOL, CallKind::Write, &deadline, &pool, move || {
                backend.delete_node_pool(target, keep_instance)
            })
            .await
        {
            Err(e) if e.is_not_found() => {
                event!(Level::INFO, %external_id, "Node pool is already gone");
                return Ok(());
            }
            deleted => deleted?,
        }

        self.wait_for(
            &pool,
            external_id,
            DELETE_NODE_POOL,
            &deadline,
            NodePoolLifeState::deletion_class,
        )
        .await?;
        event!(Level::INFO, %external_id, keep_instance, "Node pool deleted");
        Ok(())
    }
}
