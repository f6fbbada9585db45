//! Tag synchronisation against backend resources.
use crate::backend::BackendResult;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

#[cfg(feature = "mockall")]
use mockall::{mock, predicate::*};

const RESOURCE_NAME_PREFIX: &str = "qcs::";

/// Names a taggable backend resource, e.g. `qcs::tke::cluster/cls-1/nodepool/np-1`.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct TagResource {
    pub service: String,
    pub resource_type: String,
    pub resource_id: String,
}

impl TagResource {
    pub fn new<S1, S2, S3>(service: S1, resource_type: S2, resource_id: S3) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
        S3: Into<String>,
    {
        TagResource {
            service: service.into(),
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
        }
    }
}

impl fmt::Display for TagResource {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}{}::{}/{}",
            RESOURCE_NAME_PREFIX, self.service, self.resource_type, self.resource_id
        )
    }
}

/// The tag writes needed to move a resource from one tag set to another.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct TagDiff {
    /// Tags to add or overwrite.
    pub replace: BTreeMap<String, String>,
    /// Tag keys to remove.
    pub delete: Vec<String>,
}

impl TagDiff {
    pub fn between(prior: &BTreeMap<String, String>, desired: &BTreeMap<String, String>) -> Self {
        let replace = desired
            .iter()
            .filter(|(key, value)| prior.get(*key) != Some(*value))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        let delete = prior
            .keys()
            .filter(|key| !desired.contains_key(*key))
            .cloned()
            .collect();
        TagDiff { replace, delete }
    }

    pub fn is_empty(&self) -> bool {
        self.replace.is_empty() && self.delete.is_empty()
    }
}

#[async_trait]
/// Adds and removes tags on a backend resource.
pub trait TagBackend: Send + Sync {
    async fn modify_tags(&self, resource: &TagResource, diff: &TagDiff) -> BackendResult<()>;
}

#[cfg(feature = "mockall")]
mock! {
    /// A Mock TagBackend for use in tests.
    pub TagBackend {}
    #[async_trait]
    impl TagBackend for TagBackend {
        async fn modify_tags(&self, resource: &TagResource, diff: &TagDiff) -> BackendResult<()>;
    }
}

#[async_trait]
impl<T> TagBackend for Arc<T>
where
    T: TagBackend,
{
    async fn modify_tags(&self, resource: &TagResource, diff: &TagDiff) -> BackendResult<()> {
        (**self).modify_tags(resource, diff).await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use maplit::btreemap;

    #[test]
    fn test_tag_diff() {
        let prior = btreemap! {
            "team".to_string() => "infra".to_string(),
            "env".to_string() => "dev".to_string(),
            "owner".to_string() => "ops".to_string(),
        };
        let desired = btreemap! {
            "team".to_string() => "infra".to_string(),
            "env".to_string() => "prod".to_string(),
            "cost-center".to_string() => "42".to_string(),
        };

        let diff = TagDiff::between(&prior, &desired);
        assert_eq!(
            diff.replace,
            btreemap! {
                "env".to_string() => "prod".to_string(),
                "cost-center".to_string() => "42".to_string(),
            }
        );
        assert_eq!(diff.delete, vec!["owner".to_string()]);
        assert!(TagDiff::between(&desired, &desired).is_empty());
    }

    #[test]
    fn test_resource_name() {
        let resource = TagResource::new("tke", "cluster", "cls-1/nodepool/np-1");
        assert_eq!(resource.to_string(), "qcs::tke::cluster/cls-1/nodepool/np-1");
    }
}
