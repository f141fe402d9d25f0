//! Run command - Execute one e2e test package inside the cluster
//!
//! This command:
//! 1. Copies the local kubeconfig into a `kube-config` ConfigMap
//! 2. Applies the test RBAC and (re)creates the `e2e-test` pod
//! 3. Streams the pod's logs until the test binary exits
//! 4. Dumps diagnostics and exits with the test verdict

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Args;
use tracing::{info, warn};

use e2e_common::kube_utils::create_client;

use crate::cluster::{E2eCluster, KubeCluster};
use crate::config::{load_config, resolve_config_path, DevConfig, Distro};
use crate::diagnostics::{dump_all, DEFAULT_DIAGNOSTICS_DIR};
use crate::kubeconfig::create_kube_config;
use crate::manifests::{RbacManifests, TestPodOptions, DEFAULT_MANIFESTS_DIR};
use crate::runner::TestRunner;
use crate::{Error, Result};

/// Run an e2e test package in the cluster
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Test package under ./test/e2e/ to run
    #[arg(long)]
    pub test: String,

    /// Tag for all images
    #[arg(long, default_value = "latest")]
    pub tag: String,

    /// Do not dump pods, logs and events after the run
    #[arg(long)]
    pub skip_dump_diagnostic: bool,

    /// Let the test delete the resources it creates
    #[arg(long)]
    pub perform_cleanup: bool,

    /// Run the operator watching all namespaces
    #[arg(long)]
    pub cluster_wide: bool,

    /// Distro of the agent image
    #[arg(long, value_enum, default_value_t = Distro::Ubuntu)]
    pub distro: Distro,

    /// Developer config file (defaults to ~/.e2e-runner/config.json)
    #[arg(long, env = "E2E_CONFIG_FILE")]
    pub config_file: Option<PathBuf>,

    /// Kubeconfig copied into the cluster for the test pod
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Directory holding role.yaml, role_binding.yaml and service_account.yaml
    #[arg(long, default_value = DEFAULT_MANIFESTS_DIR)]
    pub manifests_dir: PathBuf,

    /// Where diagnostics are written
    #[arg(long, default_value = DEFAULT_DIAGNOSTICS_DIR)]
    pub diagnostics_dir: PathBuf,
}

impl RunArgs {
    fn pod_options(&self) -> TestPodOptions {
        TestPodOptions {
            test: self.test.clone(),
            tag: self.tag.clone(),
            distro: self.distro,
            cluster_wide: self.cluster_wide,
            perform_cleanup: self.perform_cleanup,
        }
    }
}

/// Run the test pod through to its verdict. `Ok(true)` iff the test passed.
async fn execute<C>(runner: &TestRunner<'_, C>, rbac: RbacManifests) -> Result<bool>
where
    C: E2eCluster + ?Sized,
{
    runner.run(rbac).await?;
    runner.wait_for_test_result().await
}

pub async fn run(args: RunArgs) -> Result<ExitCode> {
    let config_path = resolve_config_path(args.config_file.as_deref())?;
    let config = load_config(&config_path)?;
    info!(config = %config_path.display(), namespace = %config.namespace, "Loaded config");

    let kubeconfig = args
        .kubeconfig
        .as_deref()
        .ok_or_else(|| Error::config("no kubeconfig: pass --kubeconfig or set KUBECONFIG"))?;
    let rbac = RbacManifests::load(&args.manifests_dir)?;

    // no read timeout: the log stream stays open for the whole test
    let client = create_client(Some(kubeconfig), None).await?;
    let cluster = KubeCluster::new(client);

    create_kube_config(&cluster, &config.namespace, kubeconfig).await?;

    run_and_report(&cluster, &config, rbac, &args).await
}

/// Run the test, dump diagnostics unless skipped and turn the verdict into
/// an exit code. A failed dump is logged and never replaces the run result.
async fn run_and_report<C>(
    cluster: &C,
    config: &DevConfig,
    rbac: RbacManifests,
    args: &RunArgs,
) -> Result<ExitCode>
where
    C: E2eCluster + ?Sized,
{
    let runner = TestRunner::new(cluster, config, args.pod_options());
    let result = execute(&runner, rbac).await;

    if !args.skip_dump_diagnostic {
        if let Err(e) = dump_all(cluster, &config.namespace, &args.diagnostics_dir).await {
            warn!(error = %e, "Failed to dump diagnostics");
        }
    }

    if result? {
        info!(test = %args.test, "Test passed");
        Ok(ExitCode::SUCCESS)
    } else {
        warn!(test = %args.test, "Test failed");
        Ok(ExitCode::FAILURE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MockE2eCluster;
    use clap::Parser;
    use futures::StreamExt;
    use k8s_openapi::api::core::v1::{Pod, PodStatus, ServiceAccount};
    use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Subject};
    use kube::error::ErrorResponse;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        args: RunArgs,
    }

    fn parse(argv: &[&str]) -> RunArgs {
        TestCli::try_parse_from(std::iter::once("e2e").chain(argv.iter().copied()))
            .unwrap()
            .args
    }

    #[test]
    fn defaults() {
        let args = parse(&["--test", "replica_set", "--kubeconfig", "/tmp/kc"]);
        assert_eq!(args.tag, "latest");
        assert_eq!(args.distro, Distro::Ubuntu);
        assert!(!args.skip_dump_diagnostic);
        assert!(!args.cluster_wide);
        assert_eq!(args.manifests_dir, PathBuf::from("deploy/e2e"));
        assert_eq!(args.diagnostics_dir, PathBuf::from("diagnostics"));
    }

    #[test]
    fn flags_flow_into_pod_options() {
        let args = parse(&[
            "--test",
            "replica_set_tls",
            "--tag",
            "v0.9.0",
            "--distro",
            "ubi",
            "--cluster-wide",
            "--perform-cleanup",
        ]);
        let options = args.pod_options();
        assert_eq!(options.test, "replica_set_tls");
        assert_eq!(options.tag, "v0.9.0");
        assert_eq!(options.distro, Distro::Ubi);
        assert!(options.cluster_wide);
        assert!(options.perform_cleanup);
    }

    #[test]
    fn test_is_required() {
        assert!(TestCli::try_parse_from(["e2e", "--tag", "latest"]).is_err());
    }

    fn dev_config() -> DevConfig {
        DevConfig {
            namespace: "mongodb".to_string(),
            repo_url: "quay.io/mongodb".to_string(),
            operator_image: "community-operator".to_string(),
            operator_image_dev: None,
            e2e_image: "community-operator-e2e".to_string(),
            version_upgrade_hook_image: "version-upgrade-hook".to_string(),
            version_upgrade_hook_image_dev: None,
            readiness_probe_image: "readiness-probe".to_string(),
            readiness_probe_image_dev: None,
            agent_image_ubuntu: "agent-ubuntu".to_string(),
            agent_image_ubi: "agent-ubi".to_string(),
        }
    }

    fn rbac() -> RbacManifests {
        RbacManifests {
            role: ClusterRole::default(),
            role_binding: ClusterRoleBinding {
                subjects: Some(vec![Subject {
                    kind: "ServiceAccount".to_string(),
                    name: "e2e-test".to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            },
            service_account: ServiceAccount::default(),
        }
    }

    fn pod_in(phase: &str) -> Pod {
        Pod {
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: reason.to_string(),
            reason: reason.to_string(),
            code,
        })
    }

    fn is_success(code: ExitCode) -> bool {
        format!("{:?}", code) == format!("{:?}", ExitCode::SUCCESS)
    }

    /// Mock whose test pod runs to completion in `phase`
    fn cluster_finishing_in(phase: &'static str) -> MockE2eCluster {
        let mut cluster = MockE2eCluster::new();
        cluster.expect_delete_pod().returning(|_, _| Ok(()));
        cluster.expect_create_cluster_role().returning(|_| Ok(()));
        cluster
            .expect_create_cluster_role_binding()
            .returning(|_| Ok(()));
        cluster
            .expect_create_service_account()
            .returning(|_, _| Ok(()));
        cluster.expect_list_pods_named().returning(|_, _| Ok(vec![]));
        cluster
            .expect_create_pod()
            .returning(|_, pod| Ok(pod.clone()));
        cluster
            .expect_get_pod()
            .returning(move |_, _| Ok(pod_in(phase)));
        cluster
            .expect_follow_pod_logs()
            .returning(|_, _| Ok(futures::stream::empty().boxed()));
        cluster
    }

    #[tokio::test]
    async fn execute_reports_failed_test() {
        let config = dev_config();
        let cluster = cluster_finishing_in("Failed");

        let options = parse(&["--test", "replica_set"]).pod_options();
        let runner = TestRunner::new(&cluster, &config, options);
        assert!(!execute(&runner, rbac()).await.unwrap());
    }

    #[tokio::test]
    async fn diagnostics_are_dumped_when_the_run_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = dev_config();
        let mut cluster = MockE2eCluster::new();
        cluster
            .expect_delete_pod()
            .returning(|_, _| Err(api_error(403, "Forbidden")));
        cluster
            .expect_list_pods()
            .withf(|ns: &str| ns == "mongodb")
            .times(1)
            .returning(|_| Ok(vec![]));
        cluster.expect_list_events().returning(|_| Ok(vec![]));

        let args = parse(&[
            "--test",
            "replica_set",
            "--diagnostics-dir",
            dir.path().to_str().unwrap(),
        ]);
        let err = run_and_report(&cluster, &config, rbac(), &args)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Forbidden"));
        assert!(dir.path().join("mongodb").join("pods.yaml").exists());
    }

    #[tokio::test]
    async fn failed_dump_does_not_mask_verdict() {
        let dir = tempfile::tempdir().unwrap();
        let config = dev_config();
        let mut cluster = cluster_finishing_in("Succeeded");
        cluster
            .expect_list_pods()
            .times(1)
            .returning(|_| Err(api_error(503, "ServiceUnavailable")));

        let args = parse(&[
            "--test",
            "replica_set",
            "--diagnostics-dir",
            dir.path().to_str().unwrap(),
        ]);
        let code = run_and_report(&cluster, &config, rbac(), &args)
            .await
            .unwrap();
        assert!(is_success(code));
    }

    #[tokio::test]
    async fn skip_dump_diagnostic_skips_the_dump() {
        let config = dev_config();
        let mut cluster = cluster_finishing_in("Failed");
        cluster.expect_list_pods().never();
        cluster.expect_list_events().never();

        let args = parse(&["--test", "replica_set", "--skip-dump-diagnostic"]);
        let code = run_and_report(&cluster, &config, rbac(), &args)
            .await
            .unwrap();
        assert!(!is_success(code));
    }
}
