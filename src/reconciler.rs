//! Submission of the composed document to the cluster.

use std::future::Future;

use crate::{
    context::hook_tools::{SystemTools, ToolRunner},
    podspec::PodSpecDocument,
    Error,
};

mod cluster;
pub use cluster::ClusterReconciler;

/// Hands a [`PodSpecDocument`] to whatever reconciles it against the cluster.
///
/// Submitting an identical document again must be harmless.
pub trait Reconciler {
    fn pod_spec_set(&self, document: &PodSpecDocument) -> impl Future<Output = Result<(), Error>>;
}

/// Submits the document through the `pod-spec-set` hook tool.
///
/// The rendered YAML only lives in a temporary directory for the duration
/// of the tool call, since it carries the artifact and registry credentials.
#[derive(Debug, Clone, Default)]
pub struct PodSpecSet<R = SystemTools> {
    runner: R,
}

impl PodSpecSet<SystemTools> {
    pub fn new() -> Self {
        Self::with_runner(SystemTools)
    }
}

impl<R: ToolRunner> PodSpecSet<R> {
    pub const SPEC_FILE: &'static str = "pod-spec.yaml";
    pub const RESOURCES_FILE: &'static str = "k8s-resources.yaml";

    pub fn with_runner(runner: R) -> Self {
        Self { runner }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }
}

impl<R: ToolRunner> Reconciler for PodSpecSet<R> {
    async fn pod_spec_set(&self, document: &PodSpecDocument) -> Result<(), Error> {
        let dir = tempfile::Builder::new()
            .prefix("argo-controller-pod-spec")
            .tempdir()?;
        let spec_path = dir.path().join(Self::SPEC_FILE);
        let resources_path = dir.path().join(Self::RESOURCES_FILE);
        tokio::fs::write(&spec_path, document.spec_yaml()?).await?;
        tokio::fs::write(&resources_path, document.resources_yaml()?).await?;

        let spec_arg = spec_path.to_string_lossy();
        let resources_arg = resources_path.to_string_lossy();
        self.runner.run(
            "pod-spec-set",
            &["--file", &*spec_arg, "--k8s-resources", &*resources_arg],
        )?;

        if let Err(err) = dir.close() {
            log::warn!("cannot remove rendered pod spec: {err}");
        }
        log::info!("submitted pod spec");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeMap, path::PathBuf};

    use parking_lot::Mutex;

    use super::*;

    /// Reads the files handed to `pod-spec-set` while they still exist.
    #[derive(Default)]
    struct CapturingTools {
        fail: bool,
        files: Mutex<BTreeMap<String, (PathBuf, String)>>,
    }

    impl ToolRunner for CapturingTools {
        fn run(&self, tool: &'static str, args: &[&str]) -> Result<Vec<u8>, Error> {
            assert_eq!(tool, "pod-spec-set");
            for pair in args.chunks(2) {
                let path = PathBuf::from(pair[1]);
                let text = std::fs::read_to_string(&path).unwrap();
                self.files.lock().insert(pair[0].to_owned(), (path, text));
            }
            if self.fail {
                return Err(Error::hook_tool(tool, "cluster unreachable"));
            }
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn submits_files_and_removes_them() {
        let reconciler = PodSpecSet::with_runner(CapturingTools::default());

        let document = crate::tests::sample_document();
        reconciler.pod_spec_set(&document).await.unwrap();

        let files = reconciler.runner().files.lock();
        assert_eq!(
            files.keys().map(String::as_str).collect::<Vec<_>>(),
            ["--file", "--k8s-resources"]
        );

        let (spec_path, spec) = &files["--file"];
        assert!(spec_path.ends_with("pod-spec.yaml"));
        let written: serde_yaml::Value = serde_yaml::from_str(spec).unwrap();
        assert_eq!(written["containers"][0]["name"], "argo-controller");

        let (resources_path, resources) = &files["--k8s-resources"];
        let written: serde_yaml::Value = serde_yaml::from_str(resources).unwrap();
        assert_eq!(
            written["kubernetesResources"]["secrets"][0]["name"],
            "mlpipeline-minio-artifact"
        );

        assert!(!spec_path.exists());
        assert!(!resources_path.exists());
        assert!(!spec_path.parent().unwrap().exists());
    }

    #[tokio::test]
    async fn tool_failure_propagates_and_removes_files() {
        let reconciler = PodSpecSet::with_runner(CapturingTools {
            fail: true,
            ..Default::default()
        });
        let err = reconciler
            .pod_spec_set(&crate::tests::sample_document())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::HookTool { tool: "pod-spec-set", .. }));

        let files = reconciler.runner().files.lock();
        assert_eq!(files.len(), 2);
        for (path, text) in files.values() {
            assert!(!text.is_empty());
            assert!(!path.exists(), "{} left behind", path.display());
        }
    }
}
