//! Cluster access
//!
//! Resolves how to reach the Kubernetes API and wraps the handful of calls the
//! orchestrators make behind [`ClusterApi`], so they can be exercised against
//! a stub cluster in tests.

use crate::error::{ClusterFailure, Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::{batch::v1::Job, core::v1::ConfigMap, networking::v1::Ingress};
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::core::response::Status;
use kube::{Client, Config};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Result of a delete call: either the object as last seen (deletion pending
/// finalizers) or the API server's status document.
#[derive(Debug)]
pub enum Removed<K> {
    Object(K),
    Status(Status),
}

/// The cluster calls made by the orchestrators.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn create_job(&self, namespace: &str, job: &Job) -> Result<Job, kube::Error>;

    async fn read_job_status(&self, namespace: &str, name: &str) -> Result<Job, kube::Error>;

    async fn delete_job(&self, namespace: &str, name: &str)
        -> Result<Removed<Job>, kube::Error>;

    async fn create_ingress(&self, namespace: &str, ingress: &Ingress)
        -> Result<Ingress, kube::Error>;

    async fn read_ingress(&self, namespace: &str, name: &str) -> Result<Ingress, kube::Error>;

    async fn patch_ingress(
        &self,
        namespace: &str,
        name: &str,
        ingress: &Ingress,
    ) -> Result<Ingress, kube::Error>;

    async fn delete_ingress(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Removed<Ingress>, kube::Error>;

    async fn create_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMap,
    ) -> Result<ConfigMap, kube::Error>;

    async fn replace_config_map(
        &self,
        namespace: &str,
        name: &str,
        config_map: &ConfigMap,
    ) -> Result<ConfigMap, kube::Error>;
}

/// Hands out a cluster handle for a single operation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClusterConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn ClusterApi>>;
}

/// Resolve a cluster handle for `operation`, translating a failure into the
/// same shape as an API error.
pub(crate) async fn connect_for(
    connector: &dyn ClusterConnector,
    operation: &'static str,
    params: &Value,
) -> Result<Arc<dyn ClusterApi>, ClusterFailure> {
    connector.connect().await.map_err(|err| {
        let failure = ClusterFailure::unavailable(operation, &err, params.clone());
        failure.log();
        failure
    })
}

/// How to reach the Kubernetes API.
#[derive(Debug, Clone, Default)]
pub struct ClusterConfig {
    /// Use a local kubeconfig instead of the in-cluster service account.
    pub developer_mode: bool,
    /// Explicit kubeconfig path (developer mode only).
    pub kubeconfig: Option<PathBuf>,
}

/// Build a client from a kubeconfig (developer mode) or the mounted
/// service-account credentials.
pub async fn resolve_client(config: &ClusterConfig) -> Result<Client> {
    let kube_config = if config.developer_mode {
        load_kubeconfig(config.kubeconfig.as_ref()).await?
    } else {
        Config::incluster().map_err(|e| {
            Error::Configuration(format!("Failed to load in-cluster configuration: {e}"))
        })?
    };

    debug!(
        cluster_url = %kube_config.cluster_url,
        namespace = %kube_config.default_namespace,
        developer_mode = config.developer_mode,
        "Resolved Kubernetes client configuration"
    );

    Client::try_from(kube_config)
        .map_err(|e| Error::Configuration(format!("Failed to build Kubernetes client: {e}")))
}

async fn load_kubeconfig(path: Option<&PathBuf>) -> Result<Config> {
    let options = KubeConfigOptions::default();
    match path {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::Configuration(format!(
                    "Failed to read kubeconfig {}: {e}",
                    path.display()
                ))
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &options)
                .await
                .map_err(|e| Error::Configuration(format!("Invalid kubeconfig: {e}")))
        }
        None => Config::from_kubeconfig(&options)
            .await
            .map_err(|e| Error::Configuration(format!("Failed to load kubeconfig: {e}"))),
    }
}

/// Connector that resolves a fresh client per operation.
#[derive(Debug, Clone, Default)]
pub struct KubeConnector {
    config: ClusterConfig,
}

impl KubeConnector {
    #[must_use]
    pub fn new(config: ClusterConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ClusterConnector for KubeConnector {
    async fn connect(&self) -> Result<Arc<dyn ClusterApi>> {
        let client = resolve_client(&self.config).await?;
        Ok(Arc::new(KubeCluster::new(client)))
    }
}

/// [`ClusterApi`] over a live `kube::Client`.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn jobs(&self, namespace: &str) -> Api<Job> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn ingresses(&self, namespace: &str) -> Api<Ingress> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn config_maps(&self, namespace: &str) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn create_job(&self, namespace: &str, job: &Job) -> Result<Job, kube::Error> {
        self.jobs(namespace).create(&PostParams::default(), job).await
    }

    async fn read_job_status(&self, namespace: &str, name: &str) -> Result<Job, kube::Error> {
        self.jobs(namespace).get_status(name).await
    }

    async fn delete_job(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Removed<Job>, kube::Error> {
        // Background propagation so the Job's pods go with it.
        let params = DeleteParams::background();
        let removed = self.jobs(namespace).delete(name, &params).await?;
        info!(job = name, namespace, "Deleted Job");
        Ok(removed.either(Removed::Object, Removed::Status))
    }

    async fn create_ingress(
        &self,
        namespace: &str,
        ingress: &Ingress,
    ) -> Result<Ingress, kube::Error> {
        self.ingresses(namespace)
            .create(&PostParams::default(), ingress)
            .await
    }

    async fn read_ingress(&self, namespace: &str, name: &str) -> Result<Ingress, kube::Error> {
        self.ingresses(namespace).get(name).await
    }

    async fn patch_ingress(
        &self,
        namespace: &str,
        name: &str,
        ingress: &Ingress,
    ) -> Result<Ingress, kube::Error> {
        self.ingresses(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(ingress))
            .await
    }

    async fn delete_ingress(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Removed<Ingress>, kube::Error> {
        let removed = self
            .ingresses(namespace)
            .delete(name, &DeleteParams::default())
            .await?;
        info!(ingress = name, namespace, "Deleted Ingress");
        Ok(removed.either(Removed::Object, Removed::Status))
    }

    async fn create_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMap,
    ) -> Result<ConfigMap, kube::Error> {
        self.config_maps(namespace)
            .create(&PostParams::default(), config_map)
            .await
    }

    async fn replace_config_map(
        &self,
        namespace: &str,
        name: &str,
        config_map: &ConfigMap,
    ) -> Result<ConfigMap, kube::Error> {
        self.config_maps(namespace)
            .replace(name, &PostParams::default(), config_map)
            .await
    }
}
