//! Objects the runner creates: RBAC for the test pod and the test pod itself

use std::path::{Path, PathBuf};

use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, EnvVar, Pod, PodSpec, ServiceAccount, Volume, VolumeMount,
};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding};
use kube::core::ObjectMeta;
use serde::de::DeserializeOwned;

use crate::config::{DevConfig, Distro};
use crate::{Error, Result};

/// Name of the pod running the test binary
pub const TEST_POD_NAME: &str = "e2e-test";
/// ServiceAccount the test pod runs as (created from `service_account.yaml`)
pub const TEST_SERVICE_ACCOUNT: &str = "e2e-test";
/// ConfigMap holding the in-cluster kubeconfig
pub const KUBE_CONFIG_MAP_NAME: &str = "kube-config";
/// Key of the kubeconfig inside [`KUBE_CONFIG_MAP_NAME`]
pub const KUBE_CONFIG_KEY: &str = "kubeconfig";

const KUBE_CONFIG_VOLUME: &str = "kube-config-volume";
const KUBE_CONFIG_MOUNT_PATH: &str = "/etc/config";
const GO_TEST_TIMEOUT: &str = "30m";

/// Default location of the RBAC manifests, relative to the repository root
pub const DEFAULT_MANIFESTS_DIR: &str = "deploy/e2e";

/// RBAC objects the test pod needs
#[derive(Clone, Debug)]
pub struct RbacManifests {
    pub role: ClusterRole,
    pub role_binding: ClusterRoleBinding,
    pub service_account: ServiceAccount,
}

impl RbacManifests {
    /// Load `role.yaml`, `role_binding.yaml` and `service_account.yaml` from `dir`.
    pub fn load(dir: &Path) -> Result<Self> {
        Ok(Self {
            role: load_yaml(&dir.join("role.yaml"))?,
            role_binding: load_yaml(&dir.join("role_binding.yaml"))?,
            service_account: load_yaml(&dir.join("service_account.yaml"))?,
        })
    }

    /// Point the binding's first subject at the test namespace.
    pub fn for_namespace(mut self, namespace: &str) -> Result<Self> {
        let subject = self
            .role_binding
            .subjects
            .as_mut()
            .and_then(|subjects| subjects.first_mut())
            .ok_or_else(|| {
                Error::invalid_manifest(
                    PathBuf::from("role_binding.yaml"),
                    "ClusterRoleBinding has no subjects",
                )
            })?;
        subject.namespace = Some(namespace.to_string());
        Ok(self)
    }
}

fn load_yaml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let data = std::fs::read_to_string(path)
        .map_err(|e| Error::invalid_manifest(path, format!("failed to read: {}", e)))?;
    serde_yaml::from_str(&data).map_err(|e| Error::invalid_manifest(path, e.to_string()))
}

/// Per-run knobs that end up in the test pod
#[derive(Clone, Debug)]
pub struct TestPodOptions {
    /// Go test package under `./test/e2e/`
    pub test: String,
    /// Tag applied to every image
    pub tag: String,
    pub distro: Distro,
    pub cluster_wide: bool,
    pub perform_cleanup: bool,
}

/// Build the pod that runs `go test` for the selected e2e package.
pub fn build_test_pod(config: &DevConfig, options: &TestPodOptions) -> Pod {
    let tag = options.tag.as_str();
    let env = [
        ("CLUSTER_WIDE", options.cluster_wide.to_string()),
        (
            "OPERATOR_IMAGE",
            config.image_ref(config.operator_image_dev(), tag),
        ),
        (
            "AGENT_IMAGE",
            config.image_ref(config.agent_image(options.distro), tag),
        ),
        ("TEST_NAMESPACE", config.namespace.clone()),
        (
            "VERSION_UPGRADE_HOOK_IMAGE",
            config.image_ref(config.version_upgrade_hook_image_dev(), tag),
        ),
        (
            "READINESS_PROBE_IMAGE",
            config.image_ref(config.readiness_probe_image_dev(), tag),
        ),
        ("PERFORM_CLEANUP", options.perform_cleanup.to_string()),
    ]
    .into_iter()
    .map(|(name, value)| EnvVar {
        name: name.to_string(),
        value: Some(value),
        ..Default::default()
    })
    .collect();

    let command = vec![
        "go".to_string(),
        "test".to_string(),
        "-v".to_string(),
        format!("-timeout={}", GO_TEST_TIMEOUT),
        "-failfast".to_string(),
        format!("./test/e2e/{}", options.test),
    ];

    Pod {
        metadata: ObjectMeta {
            name: Some(TEST_POD_NAME.to_string()),
            namespace: Some(config.namespace.clone()),
            ..Default::default()
        },
        spec: Some(PodSpec {
            restart_policy: Some("Never".to_string()),
            service_account_name: Some(TEST_SERVICE_ACCOUNT.to_string()),
            containers: vec![Container {
                name: TEST_POD_NAME.to_string(),
                image: Some(config.image_ref(&config.e2e_image, tag)),
                image_pull_policy: Some("Always".to_string()),
                volume_mounts: Some(vec![VolumeMount {
                    mount_path: KUBE_CONFIG_MOUNT_PATH.to_string(),
                    name: KUBE_CONFIG_VOLUME.to_string(),
                    ..Default::default()
                }]),
                env: Some(env),
                command: Some(command),
                ..Default::default()
            }],
            volumes: Some(vec![Volume {
                name: KUBE_CONFIG_VOLUME.to_string(),
                config_map: Some(ConfigMapVolumeSource {
                    name: KUBE_CONFIG_MAP_NAME.to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifests_dir() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("../../deploy/e2e")
    }

    fn dev_config() -> DevConfig {
        DevConfig {
            namespace: "mongodb".to_string(),
            repo_url: "quay.io/mongodb".to_string(),
            operator_image: "community-operator".to_string(),
            operator_image_dev: Some("community-operator-dev".to_string()),
            e2e_image: "community-operator-e2e".to_string(),
            version_upgrade_hook_image: "version-upgrade-hook".to_string(),
            version_upgrade_hook_image_dev: None,
            readiness_probe_image: "readiness-probe".to_string(),
            readiness_probe_image_dev: None,
            agent_image_ubuntu: "agent-ubuntu".to_string(),
            agent_image_ubi: "agent-ubi".to_string(),
        }
    }

    fn options() -> TestPodOptions {
        TestPodOptions {
            test: "replica_set_tls".to_string(),
            tag: "v1.2.3".to_string(),
            distro: Distro::Ubi,
            cluster_wide: true,
            perform_cleanup: false,
        }
    }

    fn env_value<'a>(pod: &'a Pod, name: &str) -> Option<&'a str> {
        pod.spec.as_ref()?.containers[0]
            .env
            .as_ref()?
            .iter()
            .find(|e| e.name == name)?
            .value
            .as_deref()
    }

    #[test]
    fn test_pod_runs_selected_package_once() {
        let pod = build_test_pod(&dev_config(), &options());
        let spec = pod.spec.as_ref().unwrap();
        let container = &spec.containers[0];

        assert_eq!(pod.metadata.name.as_deref(), Some(TEST_POD_NAME));
        assert_eq!(pod.metadata.namespace.as_deref(), Some("mongodb"));
        assert_eq!(spec.restart_policy.as_deref(), Some("Never"));
        assert_eq!(spec.service_account_name.as_deref(), Some(TEST_SERVICE_ACCOUNT));
        assert_eq!(
            container.image.as_deref(),
            Some("quay.io/mongodb/community-operator-e2e:v1.2.3")
        );
        assert_eq!(
            container.command.as_ref().unwrap().last().map(String::as_str),
            Some("./test/e2e/replica_set_tls")
        );
        assert!(container
            .command
            .as_ref()
            .unwrap()
            .contains(&"-failfast".to_string()));
    }

    #[test]
    fn test_pod_env_points_at_tagged_dev_images() {
        let pod = build_test_pod(&dev_config(), &options());

        assert_eq!(env_value(&pod, "CLUSTER_WIDE"), Some("true"));
        assert_eq!(env_value(&pod, "PERFORM_CLEANUP"), Some("false"));
        assert_eq!(env_value(&pod, "TEST_NAMESPACE"), Some("mongodb"));
        assert_eq!(
            env_value(&pod, "OPERATOR_IMAGE"),
            Some("quay.io/mongodb/community-operator-dev:v1.2.3")
        );
        assert_eq!(
            env_value(&pod, "AGENT_IMAGE"),
            Some("quay.io/mongodb/agent-ubi:v1.2.3")
        );
        assert_eq!(
            env_value(&pod, "VERSION_UPGRADE_HOOK_IMAGE"),
            Some("quay.io/mongodb/version-upgrade-hook:v1.2.3")
        );
    }

    #[test]
    fn test_pod_mounts_kube_config_map() {
        let pod = build_test_pod(&dev_config(), &options());
        let spec = pod.spec.unwrap();

        let mount = &spec.containers[0].volume_mounts.as_ref().unwrap()[0];
        assert_eq!(mount.mount_path, "/etc/config");

        let volume = &spec.volumes.as_ref().unwrap()[0];
        assert_eq!(volume.name, mount.name);
        assert_eq!(
            volume.config_map.as_ref().map(|cm| cm.name.as_str()),
            Some(KUBE_CONFIG_MAP_NAME)
        );
    }

    #[test]
    fn rbac_manifests_load_from_deploy_dir() {
        let rbac = RbacManifests::load(&manifests_dir()).unwrap();
        assert_eq!(rbac.service_account.metadata.name.as_deref(), Some(TEST_SERVICE_ACCOUNT));
        assert!(rbac.role.rules.as_ref().is_some_and(|rules| !rules.is_empty()));
    }

    #[test]
    fn role_binding_subject_follows_test_namespace() {
        let rbac = RbacManifests::load(&manifests_dir())
            .unwrap()
            .for_namespace("team-a")
            .unwrap();
        let subjects = rbac.role_binding.subjects.unwrap();
        assert_eq!(subjects[0].namespace.as_deref(), Some("team-a"));
    }

    #[test]
    fn role_binding_without_subjects_is_invalid() {
        let mut rbac = RbacManifests::load(&manifests_dir()).unwrap();
        rbac.role_binding.subjects = None;
        let err = rbac.for_namespace("team-a").unwrap_err();
        assert!(err.to_string().contains("has no subjects"));
    }

    #[test]
    fn missing_manifest_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = RbacManifests::load(dir.path()).unwrap_err();
        assert!(err.to_string().contains("role.yaml"));
    }
}
