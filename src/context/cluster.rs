//! [`Context`] for the long-running `watch` mode, read from reflector stores
//! instead of hook tools.
//!
//! Charm options come from the ConfigMap `<app>-charm-config` and the minio
//! connection data from the Secret `<app>-minio`, both in the model namespace.
//! The image is fixed at startup.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube_runtime::reflector::{ObjectRef, Store};
use parking_lot::Mutex;

use super::{Context, Status};
use crate::{image::ImageInfo, relation::RelationUnit, Error};

pub struct ClusterContext {
    namespace: String,
    app: String,
    image: Option<ImageInfo>,
    config: Store<ConfigMap>,
    minio: Store<Secret>,
    status: Mutex<Option<Status>>,
}

impl ClusterContext {
    pub fn new(
        namespace: impl Into<String>,
        app: impl Into<String>,
        image: Option<ImageInfo>,
        config: Store<ConfigMap>,
        minio: Store<Secret>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            app: app.into(),
            image,
            config,
            minio,
            status: Mutex::new(None),
        }
    }

    pub fn config_map_name(app: &str) -> String {
        format!("{app}-charm-config")
    }

    pub fn minio_secret_name(app: &str) -> String {
        format!("{app}-minio")
    }

    /// The most recently reported status.
    pub fn last_status(&self) -> Option<Status> {
        self.status.lock().clone()
    }
}

/// ConfigMap values are strings; booleans are recovered so typed options parse.
fn option_value(raw: &str) -> serde_json::Value {
    match raw.parse::<bool>() {
        Ok(flag) => serde_json::Value::Bool(flag),
        Err(_) => serde_json::Value::String(raw.to_owned()),
    }
}

impl Context for ClusterContext {
    fn get_config(&self, key: &str) -> Result<Option<serde_json::Value>, Error> {
        let name = Self::config_map_name(&self.app);
        let config = self
            .config
            .get(&ObjectRef::new(&name).within(&self.namespace));
        Ok(config
            .and_then(|config| config.data.as_ref()?.get(key).map(|raw| option_value(raw))))
    }

    /// A single `watch` process runs per application, so it always leads.
    fn is_leader(&self) -> Result<bool, Error> {
        Ok(true)
    }

    fn report_status(&self, status: Status) {
        log::info!("status: {status}");
        *self.status.lock() = Some(status);
    }

    fn model_name(&self) -> Result<String, Error> {
        Ok(self.namespace.clone())
    }

    fn minio_units(&self) -> Result<Option<Vec<RelationUnit>>, Error> {
        let name = Self::minio_secret_name(&self.app);
        let Some(secret) = self
            .minio
            .get(&ObjectRef::new(&name).within(&self.namespace))
        else {
            return Ok(None);
        };

        let mut data = BTreeMap::new();
        for (key, value) in secret.data.iter().flatten() {
            match String::from_utf8(value.0.clone()) {
                Ok(value) => {
                    data.insert(key.clone(), value);
                }
                Err(_) => log::warn!("ignoring non-UTF-8 key {key} in secret {name}"),
            }
        }
        Ok(Some(vec![RelationUnit::new(name, data)]))
    }

    fn image_info(&self) -> Result<Option<ImageInfo>, Error> {
        Ok(self.image.clone())
    }
}
