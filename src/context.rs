//! The charm's view of its host: configuration, leadership, status, relations and resources.

use std::{fmt, sync::Arc};

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{image::ImageInfo, relation::RelationUnit, Error};

pub mod cluster;
pub mod hook_tools;
pub use cluster::ClusterContext;
pub use hook_tools::HookContext;

/// Everything the controller reads from or reports to the host.
pub trait Context {
    /// Reads a single charm config option, or `None` if it is unset.
    fn get_config(&self, key: &str) -> Result<Option<serde_json::Value>, Error>;

    /// Whether this unit is the elected leader of its application.
    fn is_leader(&self) -> Result<bool, Error>;

    /// Publishes a workload status. Failures are logged, not returned.
    fn report_status(&self, status: Status);

    /// The model name, which is also the namespace the workload runs in.
    fn model_name(&self) -> Result<String, Error>;

    /// The units joined on the minio endpoint.
    ///
    /// `None` means the relation has not been established at all,
    /// `Some(vec![])` means it exists but no remote unit has joined yet.
    fn minio_units(&self) -> Result<Option<Vec<RelationUnit>>, Error>;

    /// The controller image, or `None` while the resource is unavailable.
    fn image_info(&self) -> Result<Option<ImageInfo>, Error>;

    /// Reads all options consumed by the charm into a typed config.
    fn charm_config(&self) -> Result<CharmConfig, Error> {
        CharmConfig::from_lookup(|key| self.get_config(key))
    }
}

impl<C: Context + ?Sized> Context for Arc<C> {
    fn get_config(&self, key: &str) -> Result<Option<serde_json::Value>, Error> {
        (**self).get_config(key)
    }

    fn is_leader(&self) -> Result<bool, Error> {
        (**self).is_leader()
    }

    fn report_status(&self, status: Status) {
        (**self).report_status(status)
    }

    fn model_name(&self) -> Result<String, Error> {
        (**self).model_name()
    }

    fn minio_units(&self) -> Result<Option<Vec<RelationUnit>>, Error> {
        (**self).minio_units()
    }

    fn image_info(&self) -> Result<Option<ImageInfo>, Error> {
        (**self).image_info()
    }
}

/// Charm options, see `config.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CharmConfig {
    /// Container runtime executor used by workflow pods.
    pub executor: String,
    pub kubelet_insecure: bool,
    /// Artifact bucket in Minio.
    pub bucket: String,
    pub key_prefix: String,
}

impl Default for CharmConfig {
    fn default() -> Self {
        Self {
            executor: "k8sapi".to_owned(),
            kubelet_insecure: false,
            bucket: "mlpipeline".to_owned(),
            key_prefix: "artifacts".to_owned(),
        }
    }
}

impl CharmConfig {
    /// Builds the config from a per-key lookup, falling back to defaults for unset keys.
    pub fn from_lookup<F>(mut lookup: F) -> Result<Self, Error>
    where
        F: FnMut(&str) -> Result<Option<serde_json::Value>, Error>,
    {
        fn field<T: DeserializeOwned>(
            key: &'static str,
            value: Option<serde_json::Value>,
            default: T,
        ) -> Result<T, Error> {
            match value {
                None | Some(serde_json::Value::Null) => Ok(default),
                Some(value) => {
                    serde_json::from_value(value).map_err(|source| Error::Config { key, source })
                }
            }
        }

        let defaults = Self::default();
        Ok(Self {
            executor: field("executor", lookup("executor")?, defaults.executor)?,
            kubelet_insecure: field(
                "kubelet-insecure",
                lookup("kubelet-insecure")?,
                defaults.kubelet_insecure,
            )?,
            bucket: field("bucket", lookup("bucket")?, defaults.bucket)?,
            key_prefix: field("key-prefix", lookup("key-prefix")?, defaults.key_prefix)?,
        })
    }
}

/// Workload status phases understood by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusPhase {
    Maintenance,
    Waiting,
    Active,
}

impl StatusPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Maintenance => "maintenance",
            Self::Waiting => "waiting",
            Self::Active => "active",
        }
    }
}

impl fmt::Display for StatusPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub phase: StatusPhase,
    pub message: String,
}

impl Status {
    pub fn maintenance(message: impl Into<String>) -> Self {
        Self {
            phase: StatusPhase::Maintenance,
            message: message.into(),
        }
    }

    pub fn waiting(message: impl Into<String>) -> Self {
        Self {
            phase: StatusPhase::Waiting,
            message: message.into(),
        }
    }

    pub fn active(message: impl Into<String>) -> Self {
        Self {
            phase: StatusPhase::Active,
            message: message.into(),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.phase)
        } else {
            write!(f, "{}: {}", self.phase, self.message)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use super::*;

    #[test]
    fn unset_options_use_defaults() {
        let config = CharmConfig::from_lookup(|_| Ok(None)).unwrap();
        assert_eq!(config, CharmConfig::default());
    }

    #[test]
    fn options_are_read_by_kebab_case_key() {
        let values: HashMap<&str, serde_json::Value> = [
            ("executor", json!("docker")),
            ("kubelet-insecure", json!(true)),
            ("bucket", json!("bucket-1")),
            ("key-prefix", json!("prefix")),
        ]
        .into_iter()
        .collect();

        let config = CharmConfig::from_lookup(|key| Ok(values.get(key).cloned())).unwrap();
        assert_eq!(
            config,
            CharmConfig {
                executor: "docker".into(),
                kubelet_insecure: true,
                bucket: "bucket-1".into(),
                key_prefix: "prefix".into(),
            }
        );
    }

    #[test]
    fn mistyped_option_names_the_key() {
        let err = CharmConfig::from_lookup(|key| {
            Ok((key == "kubelet-insecure").then(|| json!("yes")))
        })
        .unwrap_err();
        assert!(matches!(err, Error::Config { key: "kubelet-insecure", .. }));
    }

    #[test]
    fn status_display() {
        assert_eq!(Status::active("").to_string(), "active");
        assert_eq!(
            Status::waiting("Waiting for minio relation.").to_string(),
            "waiting: Waiting for minio relation."
        );
    }
}
