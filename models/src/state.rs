//! Snapshots of declared resource state.
//!
//! The declarative state store owns resource state; the engine only ever receives a `StateSnapshot` (a map of
//! declared field names to typed values) and hands back a new one. Each resource kind describes its fields with a
//! static `FieldSpec` table, which drives change detection, planning and drift masking.
use serde::{Deserialize, Serialize};
use strum_macros::Display;

use std::collections::{BTreeMap, BTreeSet};

/// A typed value held by a single declared field.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    Str(String),
    /// Ordered list; order is significant for comparison.
    List(Vec<String>),
    /// Unordered collection; compared by membership.
    Set(BTreeSet<String>),
    Map(BTreeMap<String, String>),
}

impl FieldValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            FieldValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Returns list or set members. Sets are returned in sorted order.
    pub fn as_list(&self) -> Option<Vec<String>> {
        match self {
            FieldValue::List(l) => Some(l.clone()),
            FieldValue::Set(s) => Some(s.iter().cloned().collect()),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            FieldValue::Map(m) => Some(m),
            _ => None,
        }
    }

    /// The value's members regardless of ordering, used to compare the two security group representations.
    pub fn members(&self) -> Option<BTreeSet<String>> {
        match self {
            FieldValue::List(l) => Some(l.iter().cloned().collect()),
            FieldValue::Set(s) => Some(s.clone()),
            _ => None,
        }
    }

    /// Whether the value carries nothing the backend would act upon.
    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Str(s) => s.is_empty(),
            FieldValue::List(l) => l.is_empty(),
            FieldValue::Set(s) => s.is_empty(),
            FieldValue::Map(m) => m.is_empty(),
            FieldValue::Bool(_) | FieldValue::Int(_) => false,
        }
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Bool(b)
    }
}

impl From<i64> for FieldValue {
    fn from(i: i64) -> Self {
        FieldValue::Int(i)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Str(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Str(s)
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(l: Vec<String>) -> Self {
        FieldValue::List(l)
    }
}

impl From<BTreeSet<String>> for FieldValue {
    fn from(s: BTreeSet<String>) -> Self {
        FieldValue::Set(s)
    }
}

impl From<BTreeMap<String, String>> for FieldValue {
    fn from(m: BTreeMap<String, String>) -> Self {
        FieldValue::Map(m)
    }
}

/// A point-in-time copy of a resource's declared fields.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateSnapshot {
    fields: BTreeMap<String, FieldValue>,
}

/// The state a user declared for a resource.
pub type DesiredState = StateSnapshot;

impl StateSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn set<V: Into<FieldValue>>(&mut self, field: &str, value: V) {
        self.fields.insert(field.to_string(), value.into());
    }

    /// Builder-style `set`.
    pub fn with<V: Into<FieldValue>>(mut self, field: &str, value: V) -> Self {
        self.set(field, value);
        self
    }

    /// Sets the field only when a value is present.
    pub fn set_opt<V: Into<FieldValue>>(&mut self, field: &str, value: Option<V>) {
        if let Some(value) = value {
            self.set(field, value);
        }
    }

    pub fn remove(&mut self, field: &str) -> Option<FieldValue> {
        self.fields.remove(field)
    }

    pub fn get_bool(&self, field: &str) -> Option<bool> {
        self.get(field).and_then(FieldValue::as_bool)
    }

    pub fn get_int(&self, field: &str) -> Option<i64> {
        self.get(field).and_then(FieldValue::as_int)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(FieldValue::as_str)
    }

    pub fn get_list(&self, field: &str) -> Option<Vec<String>> {
        self.get(field).and_then(FieldValue::as_list)
    }

    pub fn get_map(&self, field: &str) -> Option<&BTreeMap<String, String>> {
        self.get(field).and_then(FieldValue::as_map)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// How a declared field may change once the resource exists.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "kebab-case")]
pub enum FieldKind {
    /// Cannot be changed in place; a change requires recreating the resource.
    Immutable,
    /// Maps 1:1 onto a single backend call.
    MutableDirect,
    /// Must be recombined with sibling fields into one backend payload.
    MutableComposed,
    /// Kept in the state store only; never sent to the backend on update.
    Local,
    /// Reported by the backend; never set by users.
    Computed,
}

/// The backend service that applies a field.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TargetService {
    /// Launch configuration (instance template).
    LaunchConfiguration,
    /// Capacity bounds and desired capacity of the pool.
    Capacity,
    /// Node pool attributes held by the cluster service.
    Cluster,
    /// Auto scaling group attributes.
    ScalingGroup,
    /// Chart deployment of a cluster addon.
    Addon,
    /// Tag/label synchronisation.
    Tag,
}

/// Static description of one declared field.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub service: Option<TargetService>,
    /// The backend fills this field with a default when the user leaves it unset.
    pub backend_default: bool,
    /// This field is a second representation of another field, which is the one compared for changes.
    pub alias_of: Option<&'static str>,
}

impl FieldSpec {
    pub const fn new(name: &'static str, kind: FieldKind, service: Option<TargetService>) -> Self {
        FieldSpec {
            name,
            kind,
            service,
            backend_default: false,
            alias_of: None,
        }
    }

    pub const fn backend_default(self) -> Self {
        FieldSpec {
            backend_default: true,
            ..self
        }
    }

    pub const fn alias_of(self, primary: &'static str) -> Self {
        FieldSpec {
            alias_of: Some(primary),
            ..self
        }
    }
}

/// Looks up a field in a schema table.
pub fn field_spec<'a>(schema: &'a [FieldSpec], name: &str) -> Option<&'a FieldSpec> {
    schema.iter().find(|spec| spec.name == name)
}

/// The set of declared fields that differ between two snapshots.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    fields: BTreeSet<String>,
}

impl ChangeSet {
    /// Computes the fields whose desired value differs from the prior one.
    ///
    /// Computed fields never count as changes. An alias field is skipped whenever the desired snapshot also
    /// declares the field it aliases, so only one representation is used as the source of truth.
    pub fn between(schema: &[FieldSpec], prior: &StateSnapshot, desired: &StateSnapshot) -> Self {
        let fields = schema
            .iter()
            .filter(|spec| spec.kind != FieldKind::Computed)
            .filter(|spec| match spec.alias_of {
                Some(primary) => !desired.contains(primary),
                None => true,
            })
            .filter(|spec| match (prior.get(spec.name), desired.get(spec.name)) {
                (Some(a), Some(b)) => match (a.members(), b.members()) {
                    // Sets compare by membership even when one side was declared as a list.
                    (Some(a), Some(b)) if matches!(spec.alias_of, Some(_)) => a != b,
                    _ => a != b,
                },
                (None, None) => false,
                (Some(v), None) | (None, Some(v)) => !v.is_empty(),
            })
            .map(|spec| spec.name.to_string())
            .collect();
        ChangeSet { fields }
    }

    pub fn from_fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ChangeSet {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains(field)
    }

    pub fn any_of(&self, fields: &[&str]) -> bool {
        fields.iter().any(|f| self.contains(f))
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }
}

/// The fields a user explicitly declared, derived from the last-known desired state.
///
/// Read-back consults this mask to drop values the backend injected on its own.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UserSpecifiedMask {
    fields: BTreeSet<String>,
}

impl UserSpecifiedMask {
    pub fn from_state(known: &StateSnapshot) -> Self {
        UserSpecifiedMask {
            fields: known
                .iter()
                .filter(|(_, value)| !value.is_empty())
                .map(|(name, _)| name.to_string())
                .collect(),
        }
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains(field)
    }
}

/// Whether a read is part of importing an existing resource into the state store.
///
/// Imports must populate every field the backend knows about because no prior user declaration exists to mask
/// against. The context is created for one import call and passed down explicitly.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum ImportContext {
    #[default]
    Refresh,
    Import,
}

impl ImportContext {
    pub fn is_import(&self) -> bool {
        matches!(self, ImportContext::Import)
    }
}
