//! Test pod orchestration
//!
//! A run goes through these steps:
//! 1. Remove the previous test pod and apply the RBAC it runs under
//! 2. Wait for the old pod to be gone, then create the new one
//! 3. Wait for its container to start and stream its logs
//! 4. Read the verdict from the pod's final phase

use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

use e2e_common::kube_utils::{pod_phase, PodPhase};
use e2e_common::{
    call_eventually_succeeds, ignore_if_already_exists, ignore_if_doesnt_exist, wait, ErrorKind,
    Outcome, PollSettings,
};

use crate::cluster::E2eCluster;
use crate::config::DevConfig;
use crate::manifests::{build_test_pod, RbacManifests, TestPodOptions, TEST_POD_NAME};
use crate::Result;

/// Old test pod to disappear
const POD_DELETION: PollSettings =
    PollSettings::new(Duration::from_secs(30), Duration::from_millis(500));
/// Pod creation while the previous one is still terminating
const POD_CREATION: PollSettings =
    PollSettings::new(Duration::from_secs(60), Duration::from_secs(10));
/// Image pull and container start
const POD_RUNNING: PollSettings =
    PollSettings::new(Duration::from_secs(180), Duration::from_secs(5));
/// Phase to settle after the log stream closes
const POD_RESULT: PollSettings =
    PollSettings::new(Duration::from_secs(60), Duration::from_secs(5));

/// Drives one test pod through its lifecycle
pub struct TestRunner<'a, C: E2eCluster + ?Sized> {
    cluster: &'a C,
    config: &'a DevConfig,
    options: TestPodOptions,
}

impl<'a, C: E2eCluster + ?Sized> TestRunner<'a, C> {
    pub fn new(cluster: &'a C, config: &'a DevConfig, options: TestPodOptions) -> Self {
        Self {
            cluster,
            config,
            options,
        }
    }

    fn namespace(&self) -> &'a str {
        self.config.namespace.as_str()
    }

    /// Prepare the environment, start the test pod and stream its logs
    /// until the test binary exits.
    pub async fn run(&self, rbac: RbacManifests) -> Result<()> {
        self.prepare_test_environment(rbac).await?;
        self.create_test_pod().await?;
        self.wait_for_pod_to_be_running().await?;

        let mut stdout = tokio::io::stdout();
        self.stream_pod_logs(&mut stdout).await
    }

    /// Delete the previous test pod, if any.
    pub async fn delete_test_pod(&self) -> Result<()> {
        let deleted = ignore_if_doesnt_exist(
            "delete test pod",
            self.cluster.delete_pod(self.namespace(), TEST_POD_NAME),
        )
        .await?;
        if deleted.is_some() {
            info!(pod = TEST_POD_NAME, "Deleted previous test pod");
        }
        Ok(())
    }

    /// Remove the previous test pod and apply the test RBAC.
    pub async fn prepare_test_environment(&self, rbac: RbacManifests) -> Result<()> {
        info!(namespace = %self.namespace(), "Preparing test environment");
        self.delete_test_pod().await?;

        let rbac = rbac.for_namespace(self.namespace())?;
        ignore_if_already_exists(
            "create ClusterRole",
            self.cluster.create_cluster_role(&rbac.role),
        )
        .await?;
        ignore_if_already_exists(
            "create ClusterRoleBinding",
            self.cluster.create_cluster_role_binding(&rbac.role_binding),
        )
        .await?;
        ignore_if_already_exists(
            "create ServiceAccount",
            self.cluster
                .create_service_account(self.namespace(), &rbac.service_account),
        )
        .await?;
        Ok(())
    }

    /// Wait for any old test pod to be gone, then create the new one.
    pub async fn create_test_pod(&self) -> Result<Pod> {
        let cluster = self.cluster;
        let namespace = self.namespace();

        wait(
            "previous test pod to be deleted",
            POD_DELETION,
            &[],
            move || cluster.list_pods_named(namespace, TEST_POD_NAME),
            |pods: &Vec<Pod>| pods.is_empty(),
        )
        .await?
        .ready_or_timeout("previous test pod to be deleted")?;

        let pod = build_test_pod(self.config, &self.options);
        let pod = &pod;
        info!(pod = TEST_POD_NAME, test = %self.options.test, "Creating test pod");
        let created = call_eventually_succeeds(
            "create test pod",
            POD_CREATION,
            &[
                ErrorKind::AlreadyExists,
                ErrorKind::Conflict,
                ErrorKind::Transient,
            ],
            move || cluster.create_pod(namespace, pod),
        )
        .await?
        .ready_or_timeout("test pod to be created")?;
        Ok(created)
    }

    /// Wait until the test container has started (or already finished).
    pub async fn wait_for_pod_to_be_running(&self) -> Result<Pod> {
        let cluster = self.cluster;
        let namespace = self.namespace();

        info!(pod = TEST_POD_NAME, "Waiting for test pod to start");
        let pod = wait(
            "test pod to be running",
            POD_RUNNING,
            &[ErrorKind::NotFound, ErrorKind::Transient],
            move || cluster.get_pod(namespace, TEST_POD_NAME),
            |pod: &Pod| pod_phase(pod).has_started(),
        )
        .await?
        .ready_or_timeout("test pod to be running")?;
        Ok(pod)
    }

    /// Copy the test pod's log lines to `out` until the container exits.
    pub async fn stream_pod_logs<W>(&self, out: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let mut lines = self
            .cluster
            .follow_pod_logs(self.namespace(), TEST_POD_NAME)
            .await?;
        while let Some(line) = lines.next().await {
            out.write_all(line?.as_bytes()).await?;
            out.write_all(b"\n").await?;
        }
        out.flush().await?;
        Ok(())
    }

    /// Whether the test pod finished in `Succeeded`.
    ///
    /// A pod that does not reach a terminal phase in time counts as failed.
    pub async fn wait_for_test_result(&self) -> Result<bool> {
        let cluster = self.cluster;
        let namespace = self.namespace();

        let outcome = wait(
            "test pod to finish",
            POD_RESULT,
            &[ErrorKind::NotFound, ErrorKind::Transient],
            move || cluster.get_pod(namespace, TEST_POD_NAME),
            |pod: &Pod| pod_phase(pod).is_terminal(),
        )
        .await?;

        match outcome {
            Outcome::Ready(pod) => {
                let phase = pod_phase(&pod);
                info!(pod = TEST_POD_NAME, ?phase, "Test pod finished");
                Ok(phase == PodPhase::Succeeded)
            }
            Outcome::TimedOut { elapsed, .. } => {
                warn!(
                    pod = TEST_POD_NAME,
                    ?elapsed,
                    "Test pod did not reach a terminal phase"
                );
                Ok(false)
            }
        }
    }
}
