//! Kubernetes client and pod helpers using kube-rs

use std::path::Path;
use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};

use crate::Error;

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Create a kube client from an optional kubeconfig path.
///
/// With no path, the config is inferred (`KUBECONFIG`, `~/.kube/config`,
/// or in-cluster). `read_timeout` of `None` disables the read timeout, which
/// clients that follow logs for a whole test run need.
pub async fn create_client(
    kubeconfig: Option<&Path>,
    read_timeout: Option<Duration>,
) -> Result<Client, Error> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::kubeconfig(format!("failed to read {}: {}", path.display(), e))
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| Error::kubeconfig(format!("failed to load kubeconfig: {}", e)))?
        }
        None => Config::infer()
            .await
            .map_err(|e| Error::kubeconfig(format!("failed to infer config: {}", e)))?,
    };
    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = read_timeout;
    Client::try_from(config)
        .map_err(|e| Error::kubeconfig(format!("failed to create client: {}", e)))
}

/// Field selector matching a single object by name
pub fn name_field_selector(name: &str) -> String {
    format!("metadata.name=={}", name)
}

/// Lifecycle phase of a pod as reported in `status.phase`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PodPhase {
    /// Accepted but not all containers are running yet
    Pending,
    /// Bound to a node with at least one container running
    Running,
    /// All containers exited successfully
    Succeeded,
    /// All containers exited and at least one failed
    Failed,
    /// Missing or unrecognised phase
    Unknown,
}

impl PodPhase {
    /// Parse the `status.phase` string
    pub fn parse(phase: &str) -> Self {
        match phase {
            "Pending" => PodPhase::Pending,
            "Running" => PodPhase::Running,
            "Succeeded" => PodPhase::Succeeded,
            "Failed" => PodPhase::Failed,
            _ => PodPhase::Unknown,
        }
    }

    /// The pod will not change phase again (restartPolicy Never)
    pub fn is_terminal(self) -> bool {
        matches!(self, PodPhase::Succeeded | PodPhase::Failed)
    }

    /// Containers have started; logs can be followed
    pub fn has_started(self) -> bool {
        self == PodPhase::Running || self.is_terminal()
    }
}

/// Phase of a pod, [`PodPhase::Unknown`] if it has no status yet
pub fn pod_phase(pod: &Pod) -> PodPhase {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .map(PodPhase::parse)
        .unwrap_or(PodPhase::Unknown)
}
