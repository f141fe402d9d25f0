//! In-cluster copy of the developer's kubeconfig
//!
//! The test binary runs inside a pod but expects a kubeconfig file. The local
//! kubeconfig is copied into a ConfigMap with its API server address swapped
//! for the `kubernetes` Service ClusterIP, which is reachable from pods.

use std::collections::BTreeMap;
use std::path::Path;

use k8s_openapi::api::core::v1::{ConfigMap, Namespace};
use kube::core::ObjectMeta;
use serde_yaml::Value;
use tracing::info;

use e2e_common::ignore_if_already_exists;

use crate::cluster::E2eCluster;
use crate::manifests::{KUBE_CONFIG_KEY, KUBE_CONFIG_MAP_NAME};
use crate::{Error, Result};

/// Replace the first cluster's server with `https://<cluster_ip>`.
pub fn rewrite_server(kubeconfig: &str, cluster_ip: &str) -> Result<String> {
    let mut doc: Value = serde_yaml::from_str(kubeconfig)?;

    let cluster = doc
        .get_mut("clusters")
        .and_then(|clusters| clusters.get_mut(0))
        .and_then(|entry| entry.get_mut("cluster"))
        .and_then(Value::as_mapping_mut)
        .ok_or_else(|| Error::config("kubeconfig has no clusters[0].cluster entry"))?;

    cluster.insert(
        Value::from("server"),
        Value::from(format!("https://{}", cluster_ip)),
    );

    Ok(serde_yaml::to_string(&doc)?)
}

/// ConfigMap carrying the rewritten kubeconfig
pub fn build_kube_config_map(kubeconfig: String) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(KUBE_CONFIG_MAP_NAME.to_string()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(KUBE_CONFIG_KEY.to_string(), kubeconfig)])),
        ..Default::default()
    }
}

/// Ensure the test namespace exists and holds the `kube-config` ConfigMap.
///
/// Existing objects are left as they are.
pub async fn create_kube_config<C>(
    cluster: &C,
    namespace: &str,
    kubeconfig_path: &Path,
) -> Result<()>
where
    C: E2eCluster + ?Sized,
{
    info!("Creating kube-config ConfigMap");

    let cluster_ip = cluster
        .kubernetes_service_ip()
        .await?
        .filter(|ip| !ip.is_empty())
        .ok_or_else(|| Error::command_failed("default/kubernetes Service has no ClusterIP"))?;

    let local = tokio::fs::read_to_string(kubeconfig_path)
        .await
        .map_err(|e| {
            Error::config(format!(
                "failed to read kubeconfig {}: {}",
                kubeconfig_path.display(),
                e
            ))
        })?;
    if local.trim().is_empty() {
        return Err(Error::config(format!(
            "kubeconfig {} is empty",
            kubeconfig_path.display()
        )));
    }
    let config_map = build_kube_config_map(rewrite_server(&local, &cluster_ip)?);

    info!(namespace = %namespace, "Creating Namespace");
    let ns = Namespace {
        metadata: ObjectMeta {
            name: Some(namespace.to_string()),
            ..Default::default()
        },
        ..Default::default()
    };
    ignore_if_already_exists("create namespace", cluster.create_namespace(&ns)).await?;

    ignore_if_already_exists(
        "create kube-config ConfigMap",
        cluster.create_config_map(namespace, &config_map),
    )
    .await?;

    Ok(())
}
