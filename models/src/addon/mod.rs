//! Addons: charts installed into a cluster and deployed asynchronously by the cluster service.
mod client;

pub use self::client::*;

#[cfg(feature = "mockall")]
pub use self::client::MockAddonBackend;

use crate::phase::{Phase, PhaseClass};
use crate::state::{FieldKind, FieldSpec, TargetService};

use serde::{Serialize, Serializer};

use std::fmt;

/// Declared field names of an addon attachment.
pub mod fields {
    pub const CLUSTER_ID: &str = "cluster_id";
    pub const NAME: &str = "name";
    pub const VERSION: &str = "version";
    pub const VALUES: &str = "values";
    pub const REQUEST_BODY: &str = "request_body";
    pub const RESPONSE_BODY: &str = "response_body";
    pub const STATUS: &str = "status";
}

use fields::*;

const fn composed(name: &'static str) -> FieldSpec {
    FieldSpec::new(name, FieldKind::MutableComposed, Some(TargetService::Addon))
}

pub const ADDON_FIELDS: &[FieldSpec] = &[
    FieldSpec::new(CLUSTER_ID, FieldKind::Immutable, None),
    FieldSpec::new(NAME, FieldKind::Immutable, None),
    composed(VERSION).backend_default(),
    composed(VALUES).backend_default(),
    composed(REQUEST_BODY).backend_default(),
    FieldSpec::new(RESPONSE_BODY, FieldKind::Computed, None),
    FieldSpec::new(STATUS, FieldKind::Computed, None),
];

/// The kind of object the chart service expects in a request body.
const APP_KIND: &str = "App";
const RAW_VALUES_TYPE: &str = "yaml";

/// The request sent to install or upgrade an addon.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AddonRequest {
    /// A chart version with `key=value` overrides, rendered into a request body by this crate.
    Structured {
        version: Option<String>,
        values: Vec<String>,
    },
    /// A request body supplied verbatim by the user.
    Raw(String),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AppRequest<'a> {
    kind: &'static str,
    spec: AppSpec<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AppSpec<'a> {
    chart: ChartReference<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    values: Option<AppValues<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChartReference<'a> {
    chart_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    chart_version: Option<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AppValues<'a> {
    raw_values_type: &'static str,
    values: &'a [String],
}

impl AddonRequest {
    /// Renders the request body the chart service accepts for the named addon.
    pub fn to_request_body(&self, addon_name: &str) -> serde_json::Result<String> {
        match self {
            AddonRequest::Raw(body) => Ok(body.clone()),
            AddonRequest::Structured { version, values } => serde_json::to_string(&AppRequest {
                kind: APP_KIND,
                spec: AppSpec {
                    chart: ChartReference {
                        chart_name: addon_name,
                        chart_version: version.as_deref(),
                    },
                    values: (!values.is_empty()).then(|| AppValues {
                        raw_values_type: RAW_VALUES_TYPE,
                        values: values.as_slice(),
                    }),
                },
            }),
        }
    }
}

/// An addon as described by the cluster service.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddonDescription {
    pub addon_name: String,
    pub version: Option<String>,
    pub values: Vec<String>,
    pub phase: AddonPhase,
    /// The backend's explanation of the current phase, e.g. the reason a deployment failed.
    pub reason: Option<String>,
    /// The request body the addon was last applied with.
    pub request_body: Option<String>,
    /// The full, unparsed description returned by the backend.
    pub response_body: String,
}

/// Deployment phases reported for an addon.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum AddonPhase {
    Creating,
    Upgrading,
    Deployed,
    ChartFetchFailed,
    Failed,
    RollbackFailed,
    SyncFailed,
    Deleting,
    /// The addon no longer exists. Never reported by the backend itself; a describe returning nothing maps here.
    Deleted,
    Other(String),
}

impl AddonPhase {
    /// Classifies a phase while waiting for an install or upgrade to settle. An addon that vanishes mid-install
    /// will not come back on its own.
    pub fn deployment_class(&self) -> PhaseClass {
        match self {
            AddonPhase::Deployed => PhaseClass::Succeeded,
            AddonPhase::ChartFetchFailed
            | AddonPhase::Failed
            | AddonPhase::RollbackFailed
            | AddonPhase::SyncFailed
            | AddonPhase::Deleted => PhaseClass::Failed,
            _ => PhaseClass::Pending,
        }
    }

    /// Classifies a phase while waiting for an uninstall to finish.
    pub fn deletion_class(&self) -> PhaseClass {
        match self {
            AddonPhase::Deleted => PhaseClass::Succeeded,
            _ => PhaseClass::Pending,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            AddonPhase::Creating => "Creating",
            AddonPhase::Upgrading => "Upgrading",
            AddonPhase::Deployed => "Deployed",
            AddonPhase::ChartFetchFailed => "ChartFetchFailed",
            AddonPhase::Failed => "Failed",
            AddonPhase::RollbackFailed => "RollbackFailed",
            AddonPhase::SyncFailed => "SyncFailed",
            AddonPhase::Deleting => "Deleting",
            AddonPhase::Deleted => "Deleted",
            AddonPhase::Other(phase) => phase,
        }
    }
}

impl Phase for AddonPhase {
    /// A chart that could not be fetched may become available later, e.g. once a registry recovers.
    fn is_retryable_failure(&self) -> bool {
        matches!(self, AddonPhase::ChartFetchFailed)
    }
}

impl From<&str> for AddonPhase {
    fn from(phase: &str) -> Self {
        let normalized: String = phase
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .flat_map(char::to_lowercase)
            .collect();
        match normalized.as_str() {
            "creating" | "installing" => AddonPhase::Creating,
            "upgrading" | "updating" => AddonPhase::Upgrading,
            "deployed" | "running" | "succeeded" => AddonPhase::Deployed,
            "chartfetchfailed" => AddonPhase::ChartFetchFailed,
            "failed" => AddonPhase::Failed,
            "rollbackfailed" => AddonPhase::RollbackFailed,
            "syncfailed" => AddonPhase::SyncFailed,
            "deleting" => AddonPhase::Deleting,
            _ => AddonPhase::Other(phase.to_string()),
        }
    }
}

impl fmt::Display for AddonPhase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for AddonPhase {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}
