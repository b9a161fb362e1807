//! Composition of the pod spec document for the workflow controller.
//!
//! The document follows the Juju pod spec v2 layout: a `spec` describing the
//! service account and containers, and `k8sResources` carrying the CRDs and
//! secrets that must exist alongside the workload.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD, Engine};
use k8s_openapi::api::{core::v1::SecretKeySelector, rbac::v1::PolicyRule};
use serde::{Deserialize, Serialize};

use crate::{
    context::CharmConfig, image::ImageInfo, manifest::ManifestSet, relation::MinioRelation, Error,
};

pub mod rbac;

pub const POD_SPEC_VERSION: u32 = 2;
pub const CONTAINER_NAME: &str = "argo-controller";
pub const CONTROLLER_COMMAND: &str = "workflow-controller";
pub const CONTROLLER_CONFIG_MAP: &str = "argo-controller-configmap-config";
pub const EXECUTOR_IMAGE: &str = "argoproj/argoexec:v2.12.8";
pub const ARTIFACT_SECRET: &str = "mlpipeline-minio-artifact";
pub const ACCESS_KEY: &str = "accesskey";
pub const SECRET_KEY: &str = "secretkey";
pub const CONFIG_FILE_SET: &str = "configmap";
pub const CONFIG_MOUNT_PATH: &str = "/config-map.yaml";
pub const CONFIG_FILE_KEY: &str = "config";
pub const NAMESPACE_ENV: &str = "ARGO_NAMESPACE";

/// The complete deployment handed to a [`crate::reconciler::Reconciler`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSpecDocument {
    pub spec: PodSpec,
    pub k8s_resources: K8sResources,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    pub version: u32,
    pub service_account: ServiceAccount,
    pub containers: Vec<Container>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceAccount {
    /// Rules are granted cluster-wide rather than in the model namespace.
    pub global: bool,
    pub rules: Vec<PolicyRule>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub name: String,
    pub command: Vec<String>,
    pub args: Vec<String>,
    pub image_details: ImageDetails,
    /// Environment variables.
    pub config: BTreeMap<String, String>,
    pub files: Vec<FileSet>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageDetails {
    pub image_path: String,
    pub username: String,
    pub password: String,
}

/// Files mounted into the container, keyed by file name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSet {
    pub name: String,
    pub mount_path: String,
    pub files: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct K8sResources {
    pub kubernetes_resources: KubernetesResources,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesResources {
    /// CRD specs keyed by CRD name.
    pub custom_resource_definitions: BTreeMap<String, serde_json::Value>,
    pub secrets: Vec<SecretSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: String,
    /// Base64-encoded values.
    pub data: BTreeMap<String, String>,
}

/// Contents of the controller's `/config-map.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerConfig {
    pub executor_image: String,
    pub container_runtime_executor: String,
    pub kubelet_insecure: bool,
    pub artifact_repository: ArtifactRepository,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRepository {
    pub s3: S3Artifact,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S3Artifact {
    pub bucket: String,
    pub key_prefix: String,
    pub endpoint: String,
    pub insecure: bool,
    pub access_key_secret: SecretKeySelector,
    pub secret_key_secret: SecretKeySelector,
}

/// Everything the composer needs, gathered by the controller.
#[derive(Debug, Clone, Copy)]
pub struct Inputs<'a> {
    pub image: &'a ImageInfo,
    pub minio: &'a MinioRelation,
    pub config: &'a CharmConfig,
    pub namespace: &'a str,
    pub manifests: &'a ManifestSet,
}

/// Builds the pod spec document. Pure apart from YAML serialisation of the config file.
pub fn compose(inputs: &Inputs<'_>) -> Result<PodSpecDocument, Error> {
    let config_file = serde_yaml::to_string(&controller_config(inputs.config, inputs.minio))?;

    let container = Container {
        name: CONTAINER_NAME.to_owned(),
        command: vec![CONTROLLER_COMMAND.to_owned()],
        args: [
            "--configmap",
            CONTROLLER_CONFIG_MAP,
            "--executor-image",
            EXECUTOR_IMAGE,
        ]
        .map(String::from)
        .to_vec(),
        image_details: ImageDetails {
            image_path: inputs.image.registry_path.clone(),
            username: inputs.image.username.clone(),
            password: inputs.image.password.clone(),
        },
        config: BTreeMap::from([(NAMESPACE_ENV.to_owned(), inputs.namespace.to_owned())]),
        files: vec![FileSet {
            name: CONFIG_FILE_SET.to_owned(),
            mount_path: CONFIG_MOUNT_PATH.to_owned(),
            files: BTreeMap::from([(CONFIG_FILE_KEY.to_owned(), config_file)]),
        }],
    };

    let custom_resource_definitions = inputs
        .manifests
        .crds
        .iter()
        .map(|crd| (crd.name.clone(), crd.spec.clone()))
        .collect();

    Ok(PodSpecDocument {
        spec: PodSpec {
            version: POD_SPEC_VERSION,
            service_account: ServiceAccount {
                global: true,
                rules: rbac::rules(),
            },
            containers: vec![container],
        },
        k8s_resources: K8sResources {
            kubernetes_resources: KubernetesResources {
                custom_resource_definitions,
                secrets: vec![artifact_secret(inputs.minio)],
            },
        },
    })
}

pub fn controller_config(config: &CharmConfig, minio: &MinioRelation) -> ControllerConfig {
    let secret_ref = |key: &str| SecretKeySelector {
        name: Some(ARTIFACT_SECRET.to_owned()),
        key: key.to_owned(),
        optional: None,
    };

    ControllerConfig {
        executor_image: EXECUTOR_IMAGE.to_owned(),
        container_runtime_executor: config.executor.clone(),
        kubelet_insecure: config.kubelet_insecure,
        artifact_repository: ArtifactRepository {
            s3: S3Artifact {
                bucket: config.bucket.clone(),
                key_prefix: config.key_prefix.clone(),
                endpoint: minio.endpoint(),
                insecure: true,
                access_key_secret: secret_ref(ACCESS_KEY),
                secret_key_secret: secret_ref(SECRET_KEY),
            },
        },
    }
}

/// The Minio credentials as an opaque secret the controller's S3 client reads.
pub fn artifact_secret(minio: &MinioRelation) -> SecretSpec {
    SecretSpec {
        name: ARTIFACT_SECRET.to_owned(),
        type_: "Opaque".to_owned(),
        data: BTreeMap::from([
            (ACCESS_KEY.to_owned(), STANDARD.encode(minio.user.as_bytes())),
            (SECRET_KEY.to_owned(), STANDARD.encode(minio.password.as_bytes())),
        ]),
    }
}

impl PodSpecDocument {
    pub fn spec_yaml(&self) -> Result<String, Error> {
        Ok(serde_yaml::to_string(&self.spec)?)
    }

    pub fn resources_yaml(&self) -> Result<String, Error> {
        Ok(serde_yaml::to_string(&self.k8s_resources)?)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::manifest::CrdManifest;

    fn minio() -> MinioRelation {
        MinioRelation {
            ip: "10.0.0.5".into(),
            port: "9000".into(),
            user: "minio".into(),
            password: "miniopw".into(),
        }
    }

    fn image() -> ImageInfo {
        ImageInfo {
            registry_path: "repo/argoexec".into(),
            username: "u".into(),
            password: "p".into(),
        }
    }

    fn config() -> CharmConfig {
        CharmConfig {
            executor: "docker".into(),
            kubelet_insecure: false,
            bucket: "mlpipeline".into(),
            key_prefix: "artifacts".into(),
        }
    }

    fn manifests() -> ManifestSet {
        ManifestSet {
            crds: vec![
                CrdManifest {
                    name: "workflows.argoproj.io".into(),
                    spec: json!({"group": "argoproj.io", "scope": "Namespaced"}),
                },
                CrdManifest {
                    name: "cronworkflows.argoproj.io".into(),
                    spec: json!({"group": "argoproj.io"}),
                },
            ],
        }
    }

    fn document() -> PodSpecDocument {
        let (image, minio, config, manifests) = (image(), minio(), config(), manifests());
        compose(&Inputs {
            image: &image,
            minio: &minio,
            config: &config,
            namespace: "kubeflow",
            manifests: &manifests,
        })
        .unwrap()
    }

    #[test]
    fn container_runs_workflow_controller() {
        let doc = document();
        assert_eq!(doc.spec.version, 2);
        assert!(doc.spec.service_account.global);

        let [container] = doc.spec.containers.as_slice() else {
            panic!("expected one container");
        };
        assert_eq!(container.name, "argo-controller");
        assert_eq!(container.command, ["workflow-controller"]);
        assert_eq!(
            container.args,
            [
                "--configmap",
                "argo-controller-configmap-config",
                "--executor-image",
                "argoproj/argoexec:v2.12.8",
            ]
        );
        assert_eq!(container.image_details.image_path, "repo/argoexec");
        assert_eq!(container.config["ARGO_NAMESPACE"], "kubeflow");
        assert_eq!(container.files[0].mount_path, "/config-map.yaml");
    }

    #[test]
    fn config_file_points_at_minio() {
        let doc = document();
        let text = &doc.spec.containers[0].files[0].files["config"];
        let parsed: serde_yaml::Value = serde_yaml::from_str(text).unwrap();

        assert_eq!(parsed["executorImage"], "argoproj/argoexec:v2.12.8");
        assert_eq!(parsed["containerRuntimeExecutor"], "docker");
        assert_eq!(parsed["kubeletInsecure"], false);

        let s3 = &parsed["artifactRepository"]["s3"];
        assert_eq!(s3["endpoint"], "10.0.0.5:9000");
        assert_eq!(s3["bucket"], "mlpipeline");
        assert_eq!(s3["keyPrefix"], "artifacts");
        assert_eq!(s3["insecure"], true);
        assert_eq!(s3["accessKeySecret"]["name"], "mlpipeline-minio-artifact");
        assert_eq!(s3["accessKeySecret"]["key"], "accesskey");
        assert_eq!(s3["secretKeySecret"]["key"], "secretkey");
    }

    #[test]
    fn secret_holds_base64_credentials() {
        let doc = document();
        let secrets = &doc.k8s_resources.kubernetes_resources.secrets;
        assert_eq!(secrets.len(), 1);
        assert_eq!(secrets[0].name, "mlpipeline-minio-artifact");
        assert_eq!(secrets[0].type_, "Opaque");
        assert_eq!(secrets[0].data["accesskey"], "bWluaW8=");
        assert_eq!(secrets[0].data["secretkey"], "bWluaW9wdw==");
    }

    #[test]
    fn crds_are_keyed_by_name() {
        let doc = document();
        let crds = &doc.k8s_resources.kubernetes_resources.custom_resource_definitions;
        assert_eq!(crds.len(), 2);
        assert_eq!(crds["workflows.argoproj.io"]["scope"], "Namespaced");
    }

    #[test]
    fn serialises_in_pod_spec_layout() {
        let doc = document();
        let spec: serde_yaml::Value = serde_yaml::from_str(&doc.spec_yaml().unwrap()).unwrap();
        assert_eq!(spec["serviceAccount"]["rules"][0]["apiGroups"][0], "");
        assert_eq!(
            spec["containers"][0]["imageDetails"]["imagePath"],
            "repo/argoexec"
        );

        let resources: serde_yaml::Value =
            serde_yaml::from_str(&doc.resources_yaml().unwrap()).unwrap();
        assert_eq!(
            resources["kubernetesResources"]["secrets"][0]["type"],
            "Opaque"
        );
        assert!(resources["kubernetesResources"]["customResourceDefinitions"]
            ["workflows.argoproj.io"]
            .is_mapping());
    }
}
