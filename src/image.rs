use serde::{Deserialize, Serialize};

use crate::Error;

/// Name of the OCI image resource declared in `metadata.yaml`.
pub const IMAGE_RESOURCE: &str = "oci-image";

/// Where and how to pull the controller image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfo {
    #[serde(rename = "registrypath")]
    pub registry_path: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl ImageInfo {
    /// Parses the resource file Juju hands out for an OCI image resource.
    pub fn from_resource_yaml(text: &str) -> Result<Self, Error> {
        let info: Self = serde_yaml::from_str(text)?;
        if info.registry_path.is_empty() {
            return Err(Error::resource(IMAGE_RESOURCE, "registrypath is empty"));
        }
        Ok(info)
    }
}
