//! Post-run diagnostic dump
//!
//! Writes what is needed to debug a failed run into
//! `<dir>/<namespace>/`: every pod as YAML, each container's logs, and the
//! namespace events.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::cluster::E2eCluster;
use crate::Result;

/// Default directory for diagnostic dumps
pub const DEFAULT_DIAGNOSTICS_DIR: &str = "diagnostics";

/// Dump pods, container logs and events of `namespace` under `dir`.
///
/// A container whose logs cannot be fetched (e.g. never started) is skipped
/// with a warning. Returns the directory written to.
pub async fn dump_all<C>(cluster: &C, namespace: &str, dir: &Path) -> Result<PathBuf>
where
    C: E2eCluster + ?Sized,
{
    let out = dir.join(namespace);
    tokio::fs::create_dir_all(&out).await?;
    info!(path = %out.display(), "Dumping diagnostics");

    let pods = cluster.list_pods(namespace).await?;
    tokio::fs::write(out.join("pods.yaml"), serde_yaml::to_string(&pods)?).await?;

    for pod in &pods {
        let Some(pod_name) = pod.metadata.name.as_deref() else {
            continue;
        };
        let containers = pod.spec.iter().flat_map(|spec| spec.containers.iter());
        for container in containers {
            match cluster.pod_logs(namespace, pod_name, &container.name).await {
                Ok(logs) => {
                    let file = out.join(format!("{}-{}.log", pod_name, container.name));
                    tokio::fs::write(file, logs).await?;
                }
                Err(e) => {
                    warn!(
                        pod = %pod_name,
                        container = %container.name,
                        error = %e,
                        "Failed to fetch container logs"
                    );
                }
            }
        }
    }

    let events = cluster.list_events(namespace).await?;
    tokio::fs::write(out.join("events.yaml"), serde_yaml::to_string(&events)?).await?;

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MockE2eCluster;
    use k8s_openapi::api::core::v1::{Container, Pod, PodSpec};
    use kube::core::ObjectMeta;
    use kube::error::ErrorResponse;

    fn pod(name: &str, containers: &[&str]) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: containers
                    .iter()
                    .map(|c| Container {
                        name: c.to_string(),
                        ..Default::default()
                    })
                    .collect(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn dumps_pods_logs_and_events() {
        let dir = tempfile::tempdir().unwrap();
        let mut cluster = MockE2eCluster::new();
        cluster.expect_list_pods().returning(|_| {
            Ok(vec![
                pod("e2e-test", &["e2e-test"]),
                pod("mdb-0", &["mongod", "agent"]),
            ])
        });
        cluster
            .expect_pod_logs()
            .returning(|_, pod, container| match (pod, container) {
                ("mdb-0", "agent") => Err(kube::Error::Api(ErrorResponse {
                    status: "Failure".to_string(),
                    message: "container is waiting to start".to_string(),
                    reason: "BadRequest".to_string(),
                    code: 400,
                })),
                _ => Ok(format!("{}/{} log line\n", pod, container)),
            });
        cluster.expect_list_events().returning(|_| Ok(vec![]));

        let out = dump_all(&cluster, "mongodb", dir.path()).await.unwrap();
        assert_eq!(out, dir.path().join("mongodb"));

        let pods = std::fs::read_to_string(out.join("pods.yaml")).unwrap();
        assert!(pods.contains("e2e-test"));
        assert!(pods.contains("mdb-0"));

        let log = std::fs::read_to_string(out.join("mdb-0-mongod.log")).unwrap();
        assert_eq!(log, "mdb-0/mongod log line\n");
        assert!(out.join("e2e-test-e2e-test.log").exists());
        assert!(!out.join("mdb-0-agent.log").exists());
        assert!(out.join("events.yaml").exists());
    }

    #[tokio::test]
    async fn list_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut cluster = MockE2eCluster::new();
        cluster.expect_list_pods().returning(|_| {
            Err(kube::Error::Api(ErrorResponse {
                status: "Failure".to_string(),
                message: "forbidden".to_string(),
                reason: "Forbidden".to_string(),
                code: 403,
            }))
        });

        let err = dump_all(&cluster, "mongodb", dir.path()).await.unwrap_err();
        assert!(err.to_string().contains("forbidden"));
    }
}
