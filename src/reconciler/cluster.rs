//! Applies a pod spec document straight to a cluster with server-side apply.
//!
//! This is what the `watch` mode uses in place of `pod-spec-set`: CRDs,
//! secrets, one config map per container file set, RBAC for the service
//! account and a single-replica deployment per container.

use std::{collections::BTreeMap, fmt::Debug};

use base64::{engine::general_purpose::STANDARD, Engine};
use k8s_openapi::{
    api::{
        apps::v1::{Deployment, DeploymentSpec},
        core::v1::{
            ConfigMap, ConfigMapVolumeSource, Container as PodContainer, EnvVar,
            LocalObjectReference, PodSpec as K8sPodSpec, PodTemplateSpec, Secret, ServiceAccount,
            Volume, VolumeMount,
        },
        rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding, RoleRef, Subject},
    },
    apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition,
    apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta},
    ByteString,
};
use kube_client::{Api, Client};
use kube_core::{
    params::{Patch, PatchParams},
    ApiResource, DynamicObject, Resource, ResourceExt,
};
use serde::{de::DeserializeOwned, Serialize};

use super::Reconciler;
use crate::{
    podspec::{Container, ImageDetails, PodSpecDocument, SecretSpec, ServiceAccount as Account},
    Error,
};

pub const FIELD_MANAGER: &str = "argo-controller-charm";

const NAME_LABEL: &str = "app.kubernetes.io/name";
const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
const DEFAULT_REGISTRY: &str = "https://index.docker.io/v1/";

pub struct ClusterReconciler {
    client: Client,
    namespace: String,
    app: String,
}

impl ClusterReconciler {
    /// `app` names the service account, role and deployments.
    pub fn new(client: Client, namespace: impl Into<String>, app: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            app: app.into(),
        }
    }

    async fn apply<K>(&self, api: Api<K>, object: &K) -> Result<(), Error>
    where
        K: Resource + Clone + Debug + Serialize + DeserializeOwned,
    {
        let name = object.name_any();
        let params = PatchParams::apply(FIELD_MANAGER).force();
        api.patch(&name, &params, &Patch::Apply(object)).await?;
        log::debug!("applied {name}");
        Ok(())
    }

    async fn apply_crd(&self, name: &str, spec: &serde_json::Value) -> Result<(), Error> {
        let resource = ApiResource::erase::<CustomResourceDefinition>(&());
        let api = Api::<DynamicObject>::all_with(self.client.clone(), &resource);
        let object =
            DynamicObject::new(name, &resource).data(serde_json::json!({ "spec": spec }));
        self.apply(api, &object).await
    }

    fn namespaced<K>(&self) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        K::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

impl Reconciler for ClusterReconciler {
    async fn pod_spec_set(&self, document: &PodSpecDocument) -> Result<(), Error> {
        let resources = &document.k8s_resources.kubernetes_resources;
        for (name, spec) in &resources.custom_resource_definitions {
            self.apply_crd(name, spec).await?;
        }
        for secret in &resources.secrets {
            let object = secret_object(secret, &self.namespace, &self.app)?;
            self.apply(self.namespaced::<Secret>(), &object).await?;
        }

        let rbac =
            RbacObjects::build(&document.spec.service_account, &self.namespace, &self.app);
        self.apply(self.namespaced::<ServiceAccount>(), &rbac.service_account)
            .await?;
        match rbac.binding {
            Binding::Cluster(role, binding) => {
                self.apply(Api::<ClusterRole>::all(self.client.clone()), &role)
                    .await?;
                self.apply(Api::<ClusterRoleBinding>::all(self.client.clone()), &binding)
                    .await?;
            }
            Binding::Namespaced(role, binding) => {
                self.apply(self.namespaced::<Role>(), &role).await?;
                self.apply(self.namespaced::<RoleBinding>(), &binding).await?;
            }
        }

        for container in &document.spec.containers {
            for config_map in config_maps(container, &self.namespace, &self.app) {
                self.apply(self.namespaced::<ConfigMap>(), &config_map).await?;
            }
            if let Some(secret) = pull_secret(container, &self.namespace, &self.app) {
                self.apply(self.namespaced::<Secret>(), &secret).await?;
            }
            let deployment = deployment(container, &self.namespace, &self.app);
            self.apply(self.namespaced::<Deployment>(), &deployment).await?;
        }

        log::info!(
            "applied pod spec for {} to namespace {}",
            self.app,
            self.namespace
        );
        Ok(())
    }
}

fn labels(app: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (NAME_LABEL.to_owned(), app.to_owned()),
        (MANAGED_BY_LABEL.to_owned(), FIELD_MANAGER.to_owned()),
    ])
}

fn meta(name: impl Into<String>, namespace: Option<&str>, app: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.into()),
        namespace: namespace.map(str::to_owned),
        labels: Some(labels(app)),
        ..Default::default()
    }
}

/// Decodes the base64 values of a secret spec into a typed secret.
pub fn secret_object(spec: &SecretSpec, namespace: &str, app: &str) -> Result<Secret, Error> {
    let data = spec
        .data
        .iter()
        .map(|(key, value)| -> Result<_, Error> {
            Ok((key.clone(), ByteString(STANDARD.decode(value)?)))
        })
        .collect::<Result<BTreeMap<_, _>, _>>()?;

    Ok(Secret {
        metadata: meta(&spec.name, Some(namespace), app),
        type_: Some(spec.type_.clone()),
        data: Some(data),
        ..Default::default()
    })
}

pub enum Binding {
    Cluster(ClusterRole, ClusterRoleBinding),
    Namespaced(Role, RoleBinding),
}

pub struct RbacObjects {
    pub service_account: ServiceAccount,
    pub binding: Binding,
}

impl RbacObjects {
    /// Global rules become a cluster role named after the namespace and app,
    /// so several models can deploy the charm side by side.
    pub fn build(account: &Account, namespace: &str, app: &str) -> Self {
        let service_account = ServiceAccount {
            metadata: meta(app, Some(namespace), app),
            ..Default::default()
        };
        let subjects = Some(vec![Subject {
            kind: "ServiceAccount".to_owned(),
            name: app.to_owned(),
            namespace: Some(namespace.to_owned()),
            ..Default::default()
        }]);
        let rules = Some(account.rules.clone());

        let binding = if account.global {
            let name = format!("{namespace}-{app}");
            Binding::Cluster(
                ClusterRole {
                    metadata: meta(&name, None, app),
                    rules,
                    ..Default::default()
                },
                ClusterRoleBinding {
                    metadata: meta(&name, None, app),
                    role_ref: RoleRef {
                        api_group: "rbac.authorization.k8s.io".to_owned(),
                        kind: "ClusterRole".to_owned(),
                        name,
                    },
                    subjects,
                },
            )
        } else {
            Binding::Namespaced(
                Role {
                    metadata: meta(app, Some(namespace), app),
                    rules,
                },
                RoleBinding {
                    metadata: meta(app, Some(namespace), app),
                    role_ref: RoleRef {
                        api_group: "rbac.authorization.k8s.io".to_owned(),
                        kind: "Role".to_owned(),
                        name: app.to_owned(),
                    },
                    subjects,
                },
            )
        };

        Self {
            service_account,
            binding,
        }
    }
}

/// Name of the config map backing a container file set.
pub fn config_map_name(container: &str, file_set: &str) -> String {
    format!("{container}-{file_set}-config")
}

pub fn config_maps(container: &Container, namespace: &str, app: &str) -> Vec<ConfigMap> {
    container
        .files
        .iter()
        .map(|file_set| ConfigMap {
            metadata: meta(
                config_map_name(&container.name, &file_set.name),
                Some(namespace),
                app,
            ),
            data: Some(file_set.files.clone()),
            ..Default::default()
        })
        .collect()
}

fn registry_host(image_path: &str) -> &str {
    match image_path.split_once('/') {
        Some((host, _)) if host.contains(['.', ':']) || host == "localhost" => host,
        _ => DEFAULT_REGISTRY,
    }
}

fn pull_secret_name(container: &Container) -> String {
    format!("{}-registry", container.name)
}

/// A `dockerconfigjson` secret for private images, if credentials are set.
pub fn pull_secret(container: &Container, namespace: &str, app: &str) -> Option<Secret> {
    let ImageDetails {
        image_path,
        username,
        password,
    } = &container.image_details;
    if username.is_empty() {
        return None;
    }

    let host = registry_host(image_path);
    let auth = STANDARD.encode(format!("{username}:{password}"));
    let config = serde_json::json!({
        "auths": {
            host: {
                "username": username,
                "password": password,
                "auth": auth,
            }
        }
    });

    Some(Secret {
        metadata: meta(pull_secret_name(container), Some(namespace), app),
        type_: Some("kubernetes.io/dockerconfigjson".to_owned()),
        data: Some(BTreeMap::from([(
            ".dockerconfigjson".to_owned(),
            ByteString(config.to_string().into_bytes()),
        )])),
        ..Default::default()
    })
}

pub fn deployment(container: &Container, namespace: &str, app: &str) -> Deployment {
    let mut selector = labels(app);
    selector.remove(MANAGED_BY_LABEL);

    let volumes: Vec<Volume> = container
        .files
        .iter()
        .map(|file_set| Volume {
            name: file_set.name.clone(),
            config_map: Some(ConfigMapVolumeSource {
                name: Some(config_map_name(&container.name, &file_set.name)),
                ..Default::default()
            }),
            ..Default::default()
        })
        .collect();
    let mounts = container
        .files
        .iter()
        .map(|file_set| VolumeMount {
            name: file_set.name.clone(),
            mount_path: file_set.mount_path.clone(),
            ..Default::default()
        })
        .collect();
    let env = container
        .config
        .iter()
        .map(|(name, value)| EnvVar {
            name: name.clone(),
            value: Some(value.clone()),
            ..Default::default()
        })
        .collect();
    let image_pull_secrets = (!container.image_details.username.is_empty()).then(|| {
        vec![LocalObjectReference {
            name: Some(pull_secret_name(container)),
        }]
    });

    Deployment {
        metadata: meta(&container.name, Some(namespace), app),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(selector.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(selector),
                    ..Default::default()
                }),
                spec: Some(K8sPodSpec {
                    service_account_name: Some(app.to_owned()),
                    containers: vec![PodContainer {
                        name: container.name.clone(),
                        image: Some(container.image_details.image_path.clone()),
                        command: Some(container.command.clone()),
                        args: Some(container.args.clone()),
                        env: Some(env),
                        volume_mounts: Some(mounts),
                        ..Default::default()
                    }],
                    volumes: Some(volumes),
                    image_pull_secrets,
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}
