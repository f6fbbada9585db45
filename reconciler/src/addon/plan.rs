//! Addon operation planning.
use crate::declared::DeclaredFields;
use crate::error::{self, ResourceKind, Result};
use crate::planner::{self, Operation, OperationPlan};

use models::addon::fields::*;
use models::addon::{AddonRequest, ADDON_FIELDS};
use models::state::{ChangeSet, StateSnapshot, TargetService};

use serde::Serialize;
use snafu::ResultExt;

const KIND: ResourceKind = ResourceKind::AddonAttachment;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AddonOperation {
    CreateAddon { request_body: String },
    /// Re-applies the whole request; version and values cannot be changed separately.
    UpdateAddon { request_body: String },
}

impl AddonOperation {
    pub fn request_body(&self) -> &str {
        match self {
            AddonOperation::CreateAddon { request_body } | AddonOperation::UpdateAddon { request_body } => {
                request_body
            }
        }
    }
}

impl Operation for AddonOperation {
    fn name(&self) -> &'static str {
        match self {
            AddonOperation::CreateAddon { .. } => "CreateAddon",
            AddonOperation::UpdateAddon { .. } => "UpdateAddon",
        }
    }

    fn target_service(&self) -> TargetService {
        TargetService::Addon
    }

    fn creates_resource(&self) -> bool {
        matches!(self, AddonOperation::CreateAddon { .. })
    }
}

/// The request an addon should be applied with.
///
/// A raw request body replaces the chart version and values entirely, so it cannot be combined with either.
pub(crate) fn addon_request(fields: &DeclaredFields) -> Result<AddonRequest> {
    let version = fields.str(VERSION)?;
    let values = fields.list(VALUES)?;

    match fields.str(REQUEST_BODY)? {
        Some(request_body) => {
            let structured = if version.is_some() {
                Some(VERSION)
            } else if !values.is_empty() {
                Some(VALUES)
            } else {
                None
            };
            match structured {
                Some(second) => error::ConflictingFieldsSnafu {
                    kind: KIND,
                    first: REQUEST_BODY,
                    second,
                }
                .fail(),
                None => Ok(AddonRequest::Raw(request_body)),
            }
        }
        None => Ok(AddonRequest::Structured { version, values }),
    }
}

fn request_body(fields: &DeclaredFields) -> Result<String> {
    let addon_name = fields.required_str(NAME)?;
    addon_request(fields)?
        .to_request_body(&addon_name)
        .context(error::RequestBodySnafu { kind: KIND })
}

pub fn plan_create(desired: &StateSnapshot) -> Result<OperationPlan<AddonOperation>> {
    let fields = DeclaredFields::new(KIND, desired);
    fields.required_str(CLUSTER_ID)?;

    let mut plan = OperationPlan::new();
    plan.push(AddonOperation::CreateAddon {
        request_body: request_body(&fields)?,
    });
    Ok(plan)
}

pub fn plan_update(desired: &StateSnapshot, changes: &ChangeSet) -> Result<OperationPlan<AddonOperation>> {
    planner::reject_immutable(KIND, ADDON_FIELDS, changes)?;

    let fields = DeclaredFields::new(KIND, desired);
    let request_body = request_body(&fields)?;

    let mut plan = OperationPlan::new();
    if planner::touches_service(ADDON_FIELDS, changes, TargetService::Addon) {
        plan.push(AddonOperation::UpdateAddon { request_body });
    }
    Ok(plan)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::Error;

    fn declared_addon() -> StateSnapshot {
        StateSnapshot::new()
            .with(CLUSTER_ID, "cls-1")
            .with(NAME, "tcr")
            .with(VERSION, "1.0.0")
            .with(VALUES, vec!["replicas=2".to_string()])
    }

    #[test]
    fn test_create_carries_token_and_rendered_body() {
        let plan = plan_create(&declared_addon()).unwrap();
        assert_eq!(plan.names(), vec!["CreateAddon"]);

        let create = plan.iter().next().unwrap();
        assert!(create.idempotency_token.is_some());
        let body: serde_json::Value = serde_json::from_str(create.operation.request_body()).unwrap();
        assert_eq!(body["spec"]["chart"]["chartVersion"], "1.0.0");
        assert_eq!(body["spec"]["values"]["values"][0], "replicas=2");
    }

    #[test]
    fn test_raw_body_conflicts_with_structured_fields() {
        let desired = declared_addon().with(REQUEST_BODY, r#"{"kind":"App"}"#);
        assert!(matches!(
            plan_create(&desired),
            Err(Error::ConflictingFields { ref second, .. }) if second == VERSION
        ));

        let raw = StateSnapshot::new()
            .with(CLUSTER_ID, "cls-1")
            .with(NAME, "tcr")
            .with(REQUEST_BODY, r#"{"kind":"App"}"#);
        let plan = plan_create(&raw).unwrap();
        assert_eq!(plan.iter().next().unwrap().operation.request_body(), r#"{"kind":"App"}"#);
    }

    #[test]
    fn test_update_plans() {
        let current = declared_addon();

        let desired = declared_addon().with(VERSION, "1.1.0");
        let changes = ChangeSet::between(ADDON_FIELDS, &current, &desired);
        let plan = plan_update(&desired, &changes).unwrap();
        assert_eq!(plan.names(), vec!["UpdateAddon"]);
        assert!(plan.iter().all(|op| op.idempotency_token.is_none()));

        let changes = ChangeSet::between(ADDON_FIELDS, &current, &current);
        assert!(plan_update(&current, &changes).unwrap().is_empty());

        let desired = declared_addon().with(NAME, "tcr-2");
        let changes = ChangeSet::between(ADDON_FIELDS, &current, &desired);
        assert!(plan_update(&desired, &changes).unwrap_err().requires_recreation());
    }
}
