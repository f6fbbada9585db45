use super::{
    CreateNodePoolRequest, LaunchConfiguration, LaunchTemplate, NodePoolAttributes, NodePoolDescription,
    ScalingGroup, ScalingGroupAttributes,
};
use crate::backend::{BackendResult, IdempotencyToken};
use crate::identity::NodePoolId;

use async_trait::async_trait;
use std::sync::Arc;

#[cfg(feature = "mockall")]
use mockall::{mock, predicate::*};

#[async_trait]
/// The remote operations that make up a node pool, spread across the cluster, auto scaling and launch configuration
/// services. This is provided as a trait so that the transport can be supplied by the caller and mocked in tests.
///
/// Describe calls return `Ok(None)` when the addressed resource does not exist.
pub trait NodePoolBackend: Send + Sync {
    /// Create a node pool along with its scaling group and launch configuration, returning its id.
    async fn create_node_pool(
        &self,
        request: &CreateNodePoolRequest,
        token: &IdempotencyToken,
    ) -> BackendResult<NodePoolId>;
    async fn describe_node_pool(&self, id: &NodePoolId) -> BackendResult<Option<NodePoolDescription>>;
    /// Overwrite the cluster-held attributes of a node pool.
    async fn modify_node_pool(&self, id: &NodePoolId, attributes: &NodePoolAttributes) -> BackendResult<()>;
    async fn modify_capacity_bounds(&self, id: &NodePoolId, min_size: i64, max_size: i64) -> BackendResult<()>;
    async fn modify_desired_capacity(&self, id: &NodePoolId, desired_capacity: i64) -> BackendResult<()>;
    async fn delete_node_pool(&self, id: &NodePoolId, keep_instance: bool) -> BackendResult<()>;
    async fn describe_launch_configuration(
        &self,
        launch_configuration_id: &str,
    ) -> BackendResult<Option<LaunchConfiguration>>;
    /// Replace the instance template of a launch configuration. New nodes use the new template.
    async fn upgrade_launch_configuration(
        &self,
        launch_configuration_id: &str,
        template: &LaunchTemplate,
    ) -> BackendResult<()>;
    async fn describe_scaling_group(&self, autoscaling_group_id: &str) -> BackendResult<Option<ScalingGroup>>;
    async fn modify_scaling_group(
        &self,
        autoscaling_group_id: &str,
        attributes: &ScalingGroupAttributes,
    ) -> BackendResult<()>;
}

#[cfg(feature = "mockall")]
mock! {
    /// A Mock NodePoolBackend for use in tests.
    pub NodePoolBackend {}
    #[async_trait]
    impl NodePoolBackend for NodePoolBackend {
        async fn create_node_pool(
            &self,
            request: &CreateNodePoolRequest,
            token: &IdempotencyToken,
        ) -> BackendResult<NodePoolId>;
        async fn describe_node_pool(&self, id: &NodePoolId) -> BackendResult<Option<NodePoolDescription>>;
        async fn modify_node_pool(&self, id: &NodePoolId, attributes: &NodePoolAttributes) -> BackendResult<()>;
        async fn modify_capacity_bounds(&self, id: &NodePoolId, min_size: i64, max_size: i64) -> BackendResult<()>;
        async fn modify_desired_capacity(&self, id: &NodePoolId, desired_capacity: i64) -> BackendResult<()>;
        async fn delete_node_pool(&self, id: &NodePoolId, keep_instance: bool) -> BackendResult<()>;
        async fn describe_launch_configuration(
            &self,
            launch_configuration_id: &str,
        ) -> BackendResult<Option<LaunchConfiguration>>;
        async fn upgrade_launch_configuration(
            &self,
            launch_configuration_id: &str,
            template: &LaunchTemplate,
        ) -> BackendResult<()>;
        async fn describe_scaling_group(&self, autoscaling_group_id: &str) -> BackendResult<Option<ScalingGroup>>;
        async fn modify_scaling_group(
            &self,
            autoscaling_group_id: &str,
            attributes: &ScalingGroupAttributes,
        ) -> BackendResult<()>;
    }
}

#[async_trait]
impl<T> NodePoolBackend for Arc<T>
where
    T: NodePoolBackend,
{
    async fn create_node_pool(
        &self,
        request: &CreateNodePoolRequest,
        token: &IdempotencyToken,
    ) -> BackendResult<NodePoolId> {
        (**self).create_node_pool(request, token).await
    }

    async fn describe_node_pool(&self, id: &NodePoolId) -> BackendResult<Option<NodePoolDescription>> {
        (**self).describe_node_pool(id).await
    }

    async fn modify_node_pool(&self, id: &NodePoolId, attributes: &NodePoolAttributes) -> BackendResult<()> {
        (**self).modify_node_pool(id, attributes).await
    }

    async fn modify_capacity_bounds(&self, id: &NodePoolId, min_size: i64, max_size: i64) -> BackendResult<()> {
        (**self).modify_capacity_bounds(id, min_size, max_size).await
    }

    async fn modify_desired_capacity(&self, id: &NodePoolId, desired_capacity: i64) -> BackendResult<()> {
        (**self).modify_desired_capacity(id, desired_capacity).await
    }

    async fn delete_node_pool(&self, id: &NodePoolId, keep_instance: bool) -> BackendResult<()> {
        (**self).delete_node_pool(id, keep_instance).await
    }

    async fn describe_launch_configuration(
        &self,
        launch_configuration_id: &str,
    ) -> BackendResult<Option<LaunchConfiguration>> {
        (**self).describe_launch_configuration(launch_configuration_id).await
    }

    async fn upgrade_launch_configuration(
        &self,
        launch_configuration_id: &str,
        template: &LaunchTemplate,
    ) -> BackendResult<()> {
        (**self)
            .upgrade_launch_configuration(launch_configuration_id, template)
            .await
    }

    async fn describe_scaling_group(&self, autoscaling_group_id: &str) -> BackendResult<Option<ScalingGroup>> {
        (**self).describe_scaling_group(autoscaling_group_id).await
    }

    async fn modify_scaling_group(
        &self,
        autoscaling_group_id: &str,
        attributes: &ScalingGroupAttributes,
    ) -> BackendResult<()> {
        (**self).modify_scaling_group(autoscaling_group_id, attributes).await
    }
}
