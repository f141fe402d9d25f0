//! Cluster access for the runner
//!
//! The runner only talks to the API server through [`E2eCluster`], which
//! keeps the orchestration testable with a mock. [`KubeCluster`] is the
//! kube-rs implementation used by the binary.

use async_trait::async_trait;
use futures::io::AsyncBufReadExt;
use futures::stream::BoxStream;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, Event, Namespace, Pod, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding};
use kube::api::{Api, DeleteParams, ListParams, LogParams, PostParams};
use kube::Client;
#[cfg(test)]
use mockall::automock;

use e2e_common::kube_utils::name_field_selector;

/// Lines of a followed container log
pub type LogLines = BoxStream<'static, std::io::Result<String>>;

/// Operations the runner performs against the cluster.
///
/// Errors are returned untouched so callers can classify them.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait E2eCluster: Send + Sync {
    /// ClusterIP of the `default/kubernetes` Service
    async fn kubernetes_service_ip(&self) -> Result<Option<String>, kube::Error>;

    /// Create a cluster-scoped Namespace
    async fn create_namespace(&self, namespace: &Namespace) -> Result<(), kube::Error>;

    /// Create a ConfigMap in `namespace`
    async fn create_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMap,
    ) -> Result<(), kube::Error>;

    /// Create a ClusterRole
    async fn create_cluster_role(&self, role: &ClusterRole) -> Result<(), kube::Error>;

    /// Create a ClusterRoleBinding
    async fn create_cluster_role_binding(
        &self,
        binding: &ClusterRoleBinding,
    ) -> Result<(), kube::Error>;

    /// Create a ServiceAccount in `namespace`
    async fn create_service_account(
        &self,
        namespace: &str,
        service_account: &ServiceAccount,
    ) -> Result<(), kube::Error>;

    /// Create a pod, returning the object as stored by the API server
    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod, kube::Error>;

    /// Delete a pod with default grace period
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), kube::Error>;

    /// Fetch a pod by name
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, kube::Error>;

    /// All pods in `namespace`
    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>, kube::Error>;

    /// Pods whose `metadata.name` equals `name`, including terminating ones
    async fn list_pods_named(&self, namespace: &str, name: &str) -> Result<Vec<Pod>, kube::Error>;

    /// Follow the logs of a pod's only container until it exits
    async fn follow_pod_logs(&self, namespace: &str, name: &str) -> Result<LogLines, kube::Error>;

    /// Snapshot of one container's logs
    async fn pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
    ) -> Result<String, kube::Error>;

    /// All events in `namespace`
    async fn list_events(&self, namespace: &str) -> Result<Vec<Event>, kube::Error>;
}

/// [`E2eCluster`] backed by a kube-rs client
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl E2eCluster for KubeCluster {
    async fn kubernetes_service_ip(&self) -> Result<Option<String>, kube::Error> {
        let services: Api<Service> = Api::namespaced(self.client.clone(), "default");
        let service = services.get("kubernetes").await?;
        Ok(service.spec.and_then(|spec| spec.cluster_ip))
    }

    async fn create_namespace(&self, namespace: &Namespace) -> Result<(), kube::Error> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        api.create(&PostParams::default(), namespace).await?;
        Ok(())
    }

    async fn create_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMap,
    ) -> Result<(), kube::Error> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), config_map).await?;
        Ok(())
    }

    async fn create_cluster_role(&self, role: &ClusterRole) -> Result<(), kube::Error> {
        let api: Api<ClusterRole> = Api::all(self.client.clone());
        api.create(&PostParams::default(), role).await?;
        Ok(())
    }

    async fn create_cluster_role_binding(
        &self,
        binding: &ClusterRoleBinding,
    ) -> Result<(), kube::Error> {
        let api: Api<ClusterRoleBinding> = Api::all(self.client.clone());
        api.create(&PostParams::default(), binding).await?;
        Ok(())
    }

    async fn create_service_account(
        &self,
        namespace: &str,
        service_account: &ServiceAccount,
    ) -> Result<(), kube::Error> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), service_account).await?;
        Ok(())
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod, kube::Error> {
        self.pods(namespace).create(&PostParams::default(), pod).await
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), kube::Error> {
        self.pods(namespace)
            .delete(name, &DeleteParams::default())
            .await?;
        Ok(())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, kube::Error> {
        self.pods(namespace).get(name).await
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>, kube::Error> {
        Ok(self.pods(namespace).list(&ListParams::default()).await?.items)
    }

    async fn list_pods_named(&self, namespace: &str, name: &str) -> Result<Vec<Pod>, kube::Error> {
        let params = ListParams::default().fields(&name_field_selector(name));
        Ok(self.pods(namespace).list(&params).await?.items)
    }

    async fn follow_pod_logs(&self, namespace: &str, name: &str) -> Result<LogLines, kube::Error> {
        let params = LogParams {
            follow: true,
            ..Default::default()
        };
        let reader = self.pods(namespace).log_stream(name, &params).await?;
        Ok(reader.lines().boxed())
    }

    async fn pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
    ) -> Result<String, kube::Error> {
        let params = LogParams {
            container: Some(container.to_string()),
            ..Default::default()
        };
        self.pods(namespace).logs(pod, &params).await
    }

    async fn list_events(&self, namespace: &str) -> Result<Vec<Event>, kube::Error> {
        let api: Api<Event> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }
}
