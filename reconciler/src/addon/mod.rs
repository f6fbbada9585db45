//! Addon attachments: a chart installed into a cluster and deployed asynchronously.
pub mod plan;

use self::plan::AddonOperation;
use crate::config::ReconcilerConfig;
use crate::deadline::Deadline;
use crate::declared::DeclaredFields;
use crate::error::{self, Error, ResourceKind, Result};
use crate::executor::{CallKind, Executor};
use crate::planner::{Operation, PlannedOperation};
use crate::poller::{PollResult, Poller};
use crate::readback::{self, CanonicalState};
use crate::resource::{CompositeResource, CurrentState};

use models::addon::fields::*;
use models::addon::{AddonBackend, AddonDescription, AddonPhase, ADDON_FIELDS};
use models::backend::IdempotencyToken;
use models::identity::AddonId;
use models::phase::{Observation, PhaseClass};
use models::state::{ChangeSet, DesiredState, ImportContext, StateSnapshot};

use async_trait::async_trait;
use snafu::{OptionExt, ResultExt};
use tokio::time::Duration;
use tracing::{event, instrument, Level};

const KIND: ResourceKind = ResourceKind::AddonAttachment;

const DESCRIBE_ADDON: &str = "DescribeAddon";
const DELETE_ADDON: &str = "DeleteAddon";

fn parse_id(external_id: &str) -> Result<AddonId> {
    external_id
        .parse::<AddonId>()
        .context(error::IdentitySnafu { kind: KIND })
}

/// Every field the backend reports for an addon, before masking.
fn merge(id: &AddonId, description: &AddonDescription) -> CanonicalState {
    let mut state = StateSnapshot::new()
        .with(CLUSTER_ID, id.cluster_id.as_str())
        .with(NAME, description.addon_name.as_str())
        .with(VALUES, description.values.clone())
        .with(RESPONSE_BODY, description.response_body.as_str())
        .with(STATUS, description.phase.as_str());
    state.set_opt(VERSION, description.version.clone());
    state.set_opt(REQUEST_BODY, description.request_body.clone());
    state
}

/// Reconciles addon attachments through an addon backend.
#[derive(Clone, Debug)]
pub struct AddonResource<B: AddonBackend> {
    backend: B,
    executor: Executor,
    poller: Poller,
    operation_timeout: Duration,
}

impl<B: AddonBackend> AddonResource<B> {
    pub fn new(backend: B, config: &ReconcilerConfig) -> Self {
        AddonResource {
            backend,
            executor: Executor::new(KIND, config),
            poller: Poller::new(KIND, config),
            operation_timeout: config.operation_timeout,
        }
    }

    fn deadline(&self) -> Deadline {
        Deadline::after(self.operation_timeout)
    }

    /// Describes the addon; an addon the backend does not know reads as `None`.
    async fn describe(&self, id: &AddonId, deadline: &Deadline) -> Result<Option<AddonDescription>> {
        let backend = &self.backend;
        let described = self
            .executor
            .execute(DESCRIBE_ADDON, CallKind::Read, deadline, id, move || {
                backend.describe_addon(id)
            })
            .await;
        match described {
            Err(e) if e.is_not_found() => Ok(None),
            described => described,
        }
    }

    async fn wait_for<C>(
        &self,
        id: &AddonId,
        external_id: &str,
        operation: &str,
        deadline: &Deadline,
        classify: C,
    ) -> Result<PollResult<AddonPhase>>
    where
        C: Fn(&AddonPhase) -> PhaseClass + Send + Sync,
    {
        let polled = self
            .poller
            .poll_until(
                external_id,
                operation,
                deadline,
                move || async move {
                    let observation = match self.describe(id, deadline).await? {
                        Some(description) => Observation::with_message(description.phase, description.reason),
                        None => Observation::with_message(AddonPhase::Deleted, Some("addon no longer exists")),
                    };
                    Ok::<_, Error>(observation)
                },
                classify,
            )
            .await?;
        polled.into_result(KIND, external_id, operation)
    }

    /// Deletes the addon and waits for it to disappear. An addon that is already gone counts as deleted.
    async fn delete(&self, id: &AddonId, external_id: &str, deadline: &Deadline) -> Result<()> {
        let backend = &self.backend;
        match self
            .executor
            .execute(DELETE_ADDON, CallKind::Write, deadline, id, move || {
                backend.delete_addon(id)
            })
            .await
        {
            Err(e) if e.is_not_found() => return Ok(()),
            deleted => deleted?,
        }
        self.wait_for(id, external_id, DELETE_ADDON, deadline, AddonPhase::deletion_class)
            .await?;
        Ok(())
    }

    /// Sends one planned operation and waits for the addon to deploy.
    async fn run(
        &self,
        id: &AddonId,
        external_id: &str,
        planned: &PlannedOperation<AddonOperation>,
        deadline: &Deadline,
    ) -> Result<()> {
        let backend = &self.backend;
        let operation = &planned.operation;
        let name = operation.name();
        let request_body = operation.request_body();

        match operation {
            AddonOperation::CreateAddon { .. } => {
                let token = planned
                    .idempotency_token
                    .clone()
                    .unwrap_or_else(IdempotencyToken::generate);
                let token = &token;
                self.executor
                    .execute(name, CallKind::Write, deadline, operation, move || {
                        backend.create_addon(id, request_body, token)
                    })
                    .await?
            }
            AddonOperation::UpdateAddon { .. } => {
                self.executor
                    .execute(name, CallKind::Write, deadline, operation, move || {
                        backend.update_addon(id, request_body)
                    })
                    .await?
            }
        }

        self.wait_for(id, external_id, name, deadline, AddonPhase::deployment_class)
            .await?;
        Ok(())
    }

    async fn create(&self, desired: &DesiredState, deadline: &Deadline) -> Result<String> {
        let fields = DeclaredFields::new(KIND, desired);
        let id = AddonId::new(fields.required_str(CLUSTER_ID)?, fields.required_str(NAME)?);
        let external_id = id.encode().context(error::IdentitySnafu { kind: KIND })?;

        for planned in plan::plan_create(desired)? {
            if let Err(e) = self.run(&id, &external_id, &planned, deadline).await {
                if matches!(e, Error::AsyncApply { .. }) {
                    event!(
                        Level::WARN,
                        %external_id,
                        "Addon failed to deploy, deleting it"
                    );
                    if let Err(cleanup) = self.delete(&id, &external_id, deadline).await {
                        event!(
                            Level::WARN,
                            %external_id,
                            "Unable to delete failed addon: '{}'",
                            cleanup
                        );
                    }
                }
                return Err(e);
            }
        }
        Ok(external_id)
    }

    async fn update(&self, current: &CurrentState, desired: &DesiredState, deadline: &Deadline) -> Result<String> {
        let external_id = current.external_id.as_str();
        let id = parse_id(external_id)?;
        let changes = ChangeSet::between(ADDON_FIELDS, &current.state, desired);

        for planned in plan::plan_update(desired, &changes)? {
            self.run(&id, external_id, &planned, deadline).await?;
        }
        Ok(external_id.to_string())
    }
}

#[async_trait]
impl<B: AddonBackend> CompositeResource for AddonResource<B> {
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
        let id = parse_id(external_id)?;
        let deadline = self.deadline();
        let description = self
            .describe(&id, &deadline)
            .await?
            .context(error::NotFoundSnafu {
                kind: KIND,
                resource_id: external_id,
            })?;
        Ok(readback::mask_unspecified(
            ADDON_FIELDS,
            merge(&id, &description),
            known,
            context,
        ))
    }

    #[instrument(skip(self, _known), err)]
    async fn destroy(&self, external_id: &str, _known: &StateSnapshot) -> Result<()> {
        let id = parse_id(external_id)?;
        let deadline = self.deadline();
        self.delete(&id, external_id, &deadline).await?;
        event!(Level::INFO, %external_id, "Addon deleted");
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use models::addon::MockAddonBackend;
    use models::backend::BackendError;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn resource(backend: MockAddonBackend) -> AddonResource<MockAddonBackend> {
        AddonResource::new(backend, &ReconcilerConfig::default())
    }

    fn addon(phase: AddonPhase, reason: Option<&str>) -> AddonDescription {
        AddonDescription {
            addon_name: "tcr".to_string(),
            version: Some("1.0.0".to_string()),
            values: vec!["replicas=2".to_string()],
            phase,
            reason: reason.map(str::to_string),
            request_body: Some(r#"{"kind":"App"}"#.to_string()),
            response_body: r#"{"name":"tcr","phase":"Deployed"}"#.to_string(),
        }
    }

    fn declared_addon() -> StateSnapshot {
        StateSnapshot::new()
            .with(CLUSTER_ID, "cls-1")
            .with(NAME, "tcr")
            .with(VERSION, "1.0.0")
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_waits_until_deployed() {
        let mut backend = MockAddonBackend::new();
        backend
            .expect_create_addon()
            .withf(|id: &AddonId, body: &str, _| {
                *id == AddonId::new("cls-1", "tcr") && body.contains("\"chartVersion\":\"1.0.0\"")
            })
            .returning(|_, _, _| Ok(()))
            .times(1);
        let mut describes = 0;
        backend.expect_describe_addon().returning(move |_| {
            describes += 1;
            let phase = if describes < 2 {
                AddonPhase::Creating
            } else {
                AddonPhase::Deployed
            };
            Ok(Some(addon(phase, None)))
        });

        let id = resource(backend).apply(None, &declared_addon()).await.unwrap();
        assert_eq!(id, "cls-1#tcr");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_update_is_not_deleted() {
        let mut backend = MockAddonBackend::new();
        backend
            .expect_update_addon()
            .returning(|_, _| Ok(()))
            .times(1);
        backend
            .expect_describe_addon()
            .returning(|_| Ok(Some(addon(AddonPhase::RollbackFailed, Some("upgrade rolled back")))));
        backend.expect_delete_addon().times(0);

        let current = CurrentState::new("cls-1#tcr", declared_addon());
        let desired = declared_addon().with(VERSION, "2.0.0");
        match resource(backend).apply(Some(&current), &desired).await {
            Err(Error::AsyncApply {
                phase,
                status_message,
                retryable,
                ..
            }) => {
                assert_eq!(phase, "RollbackFailed");
                assert_eq!(status_message.as_deref(), Some("upgrade rolled back"));
                assert!(!retryable);
            }
            other => panic!("expected an async apply failure, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_failure_keeps_original_error() {
        let mut backend = MockAddonBackend::new();
        backend.expect_create_addon().returning(|_, _, _| Ok(()));
        backend
            .expect_describe_addon()
            .returning(|_| Ok(Some(addon(AddonPhase::ChartFetchFailed, Some("chart not found")))));
        backend
            .expect_delete_addon()
            .returning(|_| Err(BackendError::service("FailedOperation", "addon is locked")))
            .times(1);

        match resource(backend).apply(None, &declared_addon()).await {
            Err(Error::AsyncApply { retryable, .. }) => assert!(retryable),
            other => panic!("expected an async apply failure, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_addon_vanishing_during_create_fails_fast() {
        let mut backend = MockAddonBackend::new();
        backend.expect_create_addon().returning(|_, _, _| Ok(())).times(1);
        backend.expect_describe_addon().returning(|_| Ok(None));
        backend
            .expect_delete_addon()
            .returning(|_| Err(BackendError::service("ResourceNotFound", "no such addon")))
            .times(1);

        let start = tokio::time::Instant::now();
        match resource(backend).apply(None, &declared_addon()).await {
            Err(Error::AsyncApply {
                phase,
                status_message,
                retryable,
                ..
            }) => {
                assert_eq!(phase, "Deleted");
                assert_eq!(status_message.as_deref(), Some("addon no longer exists"));
                assert!(!retryable);
            }
            other => panic!("expected an async apply failure, got {:?}", other),
        }
        assert!(start.elapsed() < ReconcilerConfig::default().poll_interval);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_masks_unspecified_request_fields() {
        let mut backend = MockAddonBackend::new();
        backend
            .expect_describe_addon()
            .returning(|_| Ok(Some(addon(AddonPhase::Deployed, None))));
        let resource = resource(backend);

        let state = resource
            .read("cls-1#tcr", &declared_addon(), ImportContext::Refresh)
            .await
            .unwrap();
        assert_eq!(state.get_str(VERSION), Some("1.0.0"));
        assert!(!state.contains(VALUES));
        assert!(!state.contains(REQUEST_BODY));
        assert_eq!(state.get_str(STATUS), Some("Deployed"));
        assert!(state.contains(RESPONSE_BODY));
        assert!(ChangeSet::between(ADDON_FIELDS, &state, &declared_addon()).is_empty());

        let imported = resource.import_from("cls-1#tcr").await.unwrap();
        assert_eq!(imported.get_list(VALUES), Some(vec!["replicas=2".to_string()]));
        assert_eq!(imported.get_str(REQUEST_BODY), Some(r#"{"kind":"App"}"#));
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_waits_until_gone() {
        let deleted = Arc::new(AtomicBool::new(false));
        let mut backend = MockAddonBackend::new();
        let marker = deleted.clone();
        backend
            .expect_delete_addon()
            .returning(move |_| {
                marker.store(true, Ordering::SeqCst);
                Ok(())
            })
            .times(1);
        let observed = deleted.clone();
        backend.expect_describe_addon().returning(move |_| {
            if observed.load(Ordering::SeqCst) {
                Ok(None)
            } else {
                Ok(Some(addon(AddonPhase::Deployed, None)))
            }
        });

        resource(backend)
            .destroy("cls-1#tcr", &StateSnapshot::new())
            .await
            .unwrap();
        assert!(deleted.load(Ordering::SeqCst));
    }
}
