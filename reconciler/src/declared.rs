//! Typed access to the fields of a declared state.
use crate::error::{self, ResourceKind, Result};

use models::state::{FieldValue, StateSnapshot};

use snafu::OptionExt;
use std::collections::BTreeMap;

/// Reads typed values out of a snapshot, reporting missing or mistyped fields against the resource kind.
#[derive(Copy, Clone, Debug)]
pub struct DeclaredFields<'a> {
    kind: ResourceKind,
    state: &'a StateSnapshot,
}

impl<'a> DeclaredFields<'a> {
    pub fn new(kind: ResourceKind, state: &'a StateSnapshot) -> Self {
        DeclaredFields { kind, state }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    fn typed<T, F>(&self, field: &str, expected: &str, convert: F) -> Result<Option<T>>
    where
        F: FnOnce(&'a FieldValue) -> Option<T>,
    {
        match self.state.get(field) {
            None => Ok(None),
            Some(value) => convert(value).map(Some).context(error::InvalidFieldSnafu {
                kind: self.kind,
                field,
                message: format!("expected {}", expected),
            }),
        }
    }

    pub fn str(&self, field: &str) -> Result<Option<String>> {
        Ok(self
            .typed(field, "a string", FieldValue::as_str)?
            .filter(|s| !s.is_empty())
            .map(str::to_string))
    }

    pub fn required_str(&self, field: &str) -> Result<String> {
        self.str(field)?.context(error::MissingFieldSnafu {
            kind: self.kind,
            field,
        })
    }

    pub fn int(&self, field: &str) -> Result<Option<i64>> {
        self.typed(field, "an integer", FieldValue::as_int)
    }

    pub fn required_int(&self, field: &str) -> Result<i64> {
        self.int(field)?.context(error::MissingFieldSnafu {
            kind: self.kind,
            field,
        })
    }

    pub fn bool(&self, field: &str) -> Result<Option<bool>> {
        self.typed(field, "a boolean", FieldValue::as_bool)
    }

    /// List or set members; an unset field reads as empty.
    pub fn list(&self, field: &str) -> Result<Vec<String>> {
        Ok(self
            .typed(field, "a list", FieldValue::as_list)?
            .unwrap_or_default())
    }

    /// An unset field reads as empty.
    pub fn map(&self, field: &str) -> Result<BTreeMap<String, String>> {
        Ok(self
            .typed(field, "a map", |value| value.as_map().cloned())?
            .unwrap_or_default())
    }
}
