use std::path::PathBuf;

/// Errors that abort a single evaluation of the charm.
///
/// Waiting on a dependency is not an error; see [`crate::runner::Outcome`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("cannot read manifest {path}: {source}")]
    ManifestRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot parse manifest {path}: {source}")]
    ManifestParse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("manifest {path} is invalid: {reason}")]
    ManifestInvalid { path: PathBuf, reason: &'static str },

    #[error("environment variable {0} is not set")]
    MissingEnv(&'static str),

    #[error("invalid value for config option {key:?}: {source}")]
    Config {
        key: &'static str,
        source: serde_json::Error,
    },

    #[error("hook tool {tool} failed: {message}")]
    HookTool { tool: &'static str, message: String },

    #[error("invalid resource {name}: {reason}")]
    Resource { name: String, reason: String },

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("base64 error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("kubernetes error: {0}")]
    Kube(#[from] kube_client::Error),

    #[error("watch error: {0}")]
    Watch(#[from] kube_runtime::watcher::Error),
}

impl Error {
    pub(crate) fn hook_tool(tool: &'static str, message: impl Into<String>) -> Self {
        Self::HookTool {
            tool,
            message: message.into(),
        }
    }

    pub(crate) fn resource(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Resource {
            name: name.into(),
            reason: reason.into(),
        }
    }
}
