//! Loading of the Argo CRD manifests shipped with the charm.

use std::path::{Path, PathBuf};

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::Deserialize;

use crate::Error;

/// CRD manifest files, relative to the manifest directory.
pub const MANIFEST_FILES: [&str; 5] = [
    "argoproj.io_clusterworkflowtemplates.yaml",
    "argoproj.io_cronworkflows.yaml",
    "argoproj.io_workflows.yaml",
    "argoproj.io_workfloweventbindings.yaml",
    "argoproj.io_workflowtemplates.yaml",
];

/// Source of the CRD definitions to deploy.
pub trait ManifestSource {
    fn load(&self) -> Result<ManifestSet, Error>;
}

/// A parsed CRD: its `metadata.name` and its `spec` block.
#[derive(Debug, Clone, PartialEq)]
pub struct CrdManifest {
    pub name: String,
    pub spec: serde_json::Value,
}

/// CRDs in load order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ManifestSet {
    pub crds: Vec<CrdManifest>,
}

impl ManifestSet {
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.crds.iter().map(|crd| crd.name.as_str())
    }
}

#[derive(Deserialize)]
struct RawManifest {
    #[serde(default)]
    metadata: ObjectMeta,
    spec: serde_json::Value,
}

/// Parses one manifest document. `path` is only used in errors.
pub fn parse_manifest(path: &Path, text: &str) -> Result<CrdManifest, Error> {
    let raw: RawManifest = serde_yaml::from_str(text).map_err(|source| Error::ManifestParse {
        path: path.to_owned(),
        source,
    })?;

    let invalid = |reason| Error::ManifestInvalid {
        path: path.to_owned(),
        reason,
    };
    let name = raw
        .metadata
        .name
        .filter(|name| !name.is_empty())
        .ok_or_else(|| invalid("metadata.name is missing"))?;
    if !raw.spec.is_object() {
        return Err(invalid("spec is not a mapping"));
    }

    Ok(CrdManifest {
        name,
        spec: raw.spec,
    })
}

/// Reads [`MANIFEST_FILES`] from a directory, normally `<charm>/files`.
#[derive(Debug, Clone)]
pub struct ManifestDir {
    dir: PathBuf,
}

impl ManifestDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl ManifestSource for ManifestDir {
    fn load(&self) -> Result<ManifestSet, Error> {
        let crds = MANIFEST_FILES
            .iter()
            .map(|file| {
                let path = self.dir.join(file);
                let text = std::fs::read_to_string(&path).map_err(|source| {
                    Error::ManifestRead {
                        path: path.clone(),
                        source,
                    }
                })?;
                let crd = parse_manifest(&path, &text)?;
                log::debug!("loaded CRD {} from {}", crd.name, path.display());
                Ok(crd)
            })
            .collect::<Result<_, Error>>()?;
        Ok(ManifestSet { crds })
    }
}
