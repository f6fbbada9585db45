use super::AddonDescription;
use crate::backend::{BackendResult, IdempotencyToken};
use crate::identity::AddonId;

use async_trait::async_trait;
use std::sync::Arc;

#[cfg(feature = "mockall")]
use mockall::{mock, predicate::*};

#[async_trait]
/// The remote operations of the cluster addon service. Install and upgrade are accepted immediately and deployed
/// in the background; callers observe progress through `describe_addon`.
pub trait AddonBackend: Send + Sync {
    async fn create_addon(
        &self,
        id: &AddonId,
        request_body: &str,
        token: &IdempotencyToken,
    ) -> BackendResult<()>;
    /// Returns `Ok(None)` when the addon is not installed.
    async fn describe_addon(&self, id: &AddonId) -> BackendResult<Option<AddonDescription>>;
    async fn update_addon(&self, id: &AddonId, request_body: &str) -> BackendResult<()>;
    async fn delete_addon(&self, id: &AddonId) -> BackendResult<()>;
}

#[cfg(feature = "mockall")]
mock! {
    /// A Mock AddonBackend for use in tests.
    pub AddonBackend {}
    #[async_trait]
    impl AddonBackend for AddonBackend {
        async fn create_addon(
            &self,
            id: &AddonId,
            request_body: &str,
            token: &IdempotencyToken,
        ) -> BackendResult<()>;
        async fn describe_addon(&self, id: &AddonId) -> BackendResult<Option<AddonDescription>>;
        async fn update_addon(&self, id: &AddonId, request_body: &str) -> BackendResult<()>;
        async fn delete_addon(&self, id: &AddonId) -> BackendResult<()>;
    }
}

#[async_trait]
impl<T> AddonBackend for Arc<T>
where
    T: AddonBackend,
{
    async fn create_addon(
        &self,
        id: &AddonId,
        request_body: &str,
        token: &IdempotencyToken,
    ) -> BackendResult<()> {
        (**self).create_addon(id, request_body, token).await
    }

    async fn describe_addon(&self, id: &AddonId) -> BackendResult<Option<AddonDescription>> {
        (**self).describe_addon(id).await
    }

    async fn update_addon(&self, id: &AddonId, request_body: &str) -> BackendResult<()> {
        (**self).update_addon(id, request_body).await
    }

    async fn delete_addon(&self, id: &AddonId) -> BackendResult<()> {
        (**self).delete_addon(id).await
    }
}
