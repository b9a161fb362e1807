use std::{collections::BTreeMap, path::PathBuf, process::Command};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;

use super::{Context, Status};
use crate::{
    image::{ImageInfo, IMAGE_RESOURCE},
    relation::{RelationUnit, MINIO_ENDPOINT},
    Error,
};

/// Environment variable holding the model name.
pub const MODEL_NAME_ENV: &str = "JUJU_MODEL_NAME";

/// Executes Juju hook tools.
pub trait ToolRunner {
    /// Runs `tool` with `args`, returning stdout on success.
    fn run(&self, tool: &'static str, args: &[&str]) -> Result<Vec<u8>, Error>;
}

/// Runs hook tools as child processes, found on `PATH`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTools;

impl ToolRunner for SystemTools {
    fn run(&self, tool: &'static str, args: &[&str]) -> Result<Vec<u8>, Error> {
        log::trace!("running {tool} {args:?}");
        let output = Command::new(tool)
            .args(args)
            .output()
            .map_err(|err| Error::hook_tool(tool, format!("cannot execute: {err}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::hook_tool(
                tool,
                format!("{}: {}", output.status, stderr.trim()),
            ));
        }
        Ok(output.stdout)
    }
}

/// [`Context`] backed by the hook tools available inside a Juju hook.
///
/// Charm options are fetched with a single `config-get` on first use.
#[derive(Debug)]
pub struct HookContext<R = SystemTools> {
    runner: R,
    model_name: Option<String>,
    config: Mutex<Option<serde_json::Map<String, serde_json::Value>>>,
}

impl HookContext<SystemTools> {
    pub fn from_env() -> Self {
        Self::new(SystemTools, std::env::var(MODEL_NAME_ENV).ok())
    }
}

impl<R: ToolRunner> HookContext<R> {
    pub fn new(runner: R, model_name: Option<String>) -> Self {
        Self {
            runner,
            model_name,
            config: Mutex::new(None),
        }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    fn json<T: DeserializeOwned>(&self, tool: &'static str, args: &[&str]) -> Result<T, Error> {
        let stdout = self.runner.run(tool, args)?;
        serde_json::from_slice(&stdout).map_err(|err| Error::hook_tool(tool, err.to_string()))
    }
}

impl<R: ToolRunner> Context for HookContext<R> {
    fn get_config(&self, key: &str) -> Result<Option<serde_json::Value>, Error> {
        let mut cache = self.config.lock();
        let config = match &mut *cache {
            Some(config) => config,
            empty @ None => empty.insert(self.json("config-get", &["--format=json"])?),
        };
        Ok(config.get(key).filter(|value| !value.is_null()).cloned())
    }

    fn is_leader(&self) -> Result<bool, Error> {
        self.json("is-leader", &["--format=json"])
    }

    fn report_status(&self, status: Status) {
        log::info!("status: {status}");
        let args = [status.phase.as_str(), status.message.as_str()];
        if let Err(err) = self.runner.run("status-set", &args) {
            log::warn!("cannot set status: {err}");
        }
    }

    fn model_name(&self) -> Result<String, Error> {
        self.model_name
            .clone()
            .filter(|name| !name.is_empty())
            .ok_or(Error::MissingEnv(MODEL_NAME_ENV))
    }

    fn minio_units(&self) -> Result<Option<Vec<RelationUnit>>, Error> {
        let ids: Vec<String> = self.json("relation-ids", &[MINIO_ENDPOINT, "--format=json"])?;
        if ids.is_empty() {
            return Ok(None);
        }

        let mut units = Vec::new();
        for id in &ids {
            let names: Vec<String> =
                self.json("relation-list", &["-r", id.as_str(), "--format=json"])?;
            for name in names {
                let data: BTreeMap<String, String> = self.json(
                    "relation-get",
                    &["-r", id.as_str(), "--format=json", "-", name.as_str()],
                )?;
                units.push(RelationUnit::new(name, data));
            }
        }
        Ok(Some(units))
    }

    fn image_info(&self) -> Result<Option<ImageInfo>, Error> {
        let stdout = match self.runner.run("resource-get", &[IMAGE_RESOURCE]) {
            Ok(stdout) => stdout,
            Err(err) => {
                log::debug!("{IMAGE_RESOURCE} resource is not available: {err}");
                return Ok(None);
            }
        };
        let path = PathBuf::from(String::from_utf8_lossy(&stdout).trim());
        let text = std::fs::read_to_string(&path)?;
        ImageInfo::from_resource_yaml(&text).map(Some)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::context::StatusPhase;

    /// Replays canned hook tool output and records every invocation.
    #[derive(Default)]
    pub(crate) struct ScriptedTools {
        pub(crate) responses: HashMap<String, Result<String, String>>,
        pub(crate) calls: Mutex<Vec<String>>,
    }

    impl ScriptedTools {
        pub(crate) fn respond(mut self, command: &str, stdout: &str) -> Self {
            self.responses
                .insert(command.to_owned(), Ok(stdout.to_owned()));
            self
        }

        pub(crate) fn fail(mut self, command: &str, stderr: &str) -> Self {
            self.responses
                .insert(command.to_owned(), Err(stderr.to_owned()));
            self
        }
    }

    impl ToolRunner for ScriptedTools {
        fn run(&self, tool: &'static str, args: &[&str]) -> Result<Vec<u8>, Error> {
            let command = std::iter::once(tool)
                .chain(args.iter().copied())
                .collect::<Vec<_>>()
                .join(" ");
            self.calls.lock().push(command.clone());
            match self.responses.get(&command) {
                Some(Ok(stdout)) => Ok(stdout.clone().into_bytes()),
                Some(Err(stderr)) => Err(Error::hook_tool(tool, stderr.clone())),
                None => Err(Error::hook_tool(tool, format!("unexpected call: {command}"))),
            }
        }
    }

    #[test]
    fn reads_config_and_leadership() {
        let tools = ScriptedTools::default()
            .respond(
                "config-get --format=json",
                r#"{"executor": "docker", "kubelet-insecure": true, "bucket": null, "key-prefix": "wf"}"#,
            )
            .respond("is-leader --format=json", "true");
        let ctx = HookContext::new(tools, Some("kubeflow".into()));

        let config = ctx.charm_config().unwrap();
        assert_eq!(config.executor, "docker");
        assert!(config.kubelet_insecure);
        assert_eq!(config.bucket, "mlpipeline");
        assert_eq!(config.key_prefix, "wf");
        assert!(ctx.is_leader().unwrap());
        assert_eq!(ctx.model_name().unwrap(), "kubeflow");
    }

    #[test]
    fn config_is_fetched_once() {
        let tools =
            ScriptedTools::default().respond("config-get --format=json", r#"{"bucket": "wf"}"#);
        let ctx = HookContext::new(tools, None);

        assert_eq!(ctx.charm_config().unwrap().bucket, "wf");
        assert_eq!(ctx.get_config("executor").unwrap(), None);
        assert_eq!(ctx.charm_config().unwrap().executor, "k8sapi");
        assert_eq!(ctx.runner().calls.lock().as_slice(), ["config-get --format=json"]);
    }

    #[test]
    fn failed_config_get_is_retried() {
        let ctx = HookContext::new(
            ScriptedTools::default().fail("config-get --format=json", "not in a hook"),
            None,
        );
        assert!(ctx.get_config("bucket").is_err());
        assert!(ctx.get_config("bucket").is_err());
        assert_eq!(ctx.runner().calls.lock().len(), 2);
    }

    #[test]
    fn missing_model_name_is_an_error() {
        let ctx = HookContext::new(ScriptedTools::default(), None);
        assert!(matches!(
            ctx.model_name(),
            Err(Error::MissingEnv("JUJU_MODEL_NAME"))
        ));
    }

    #[test]
    fn relation_absent_vs_empty() {
        let ctx = HookContext::new(
            ScriptedTools::default().respond("relation-ids minio --format=json", "[]"),
            None,
        );
        assert_eq!(ctx.minio_units().unwrap(), None);

        let ctx = HookContext::new(
            ScriptedTools::default()
                .respond("relation-ids minio --format=json", r#"["minio:3"]"#)
                .respond("relation-list -r minio:3 --format=json", "[]"),
            None,
        );
        assert_eq!(ctx.minio_units().unwrap(), Some(vec![]));
    }

    #[test]
    fn collects_unit_data() {
        let tools = ScriptedTools::default()
            .respond("relation-ids minio --format=json", r#"["minio:3"]"#)
            .respond(
                "relation-list -r minio:3 --format=json",
                r#"["minio/0", "minio/1"]"#,
            )
            .respond(
                "relation-get -r minio:3 --format=json - minio/0",
                r#"{"ip": "10.0.0.5", "port": "9000", "user": "minio", "password": "miniopw"}"#,
            )
            .respond("relation-get -r minio:3 --format=json - minio/1", "{}");
        let ctx = HookContext::new(tools, None);

        let units = ctx.minio_units().unwrap().unwrap();
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].unit, "minio/0");
        assert_eq!(units[0].data["ip"], "10.0.0.5");
        assert!(units[1].data.is_empty());
    }

    #[test]
    fn image_resource() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("content");
        std::fs::write(&path, "registrypath: repo/argoexec\nusername: u\npassword: p\n").unwrap();

        let ctx = HookContext::new(
            ScriptedTools::default().respond(
                "resource-get oci-image",
                &format!("{}\n", path.display()),
            ),
            None,
        );
        let info = ctx.image_info().unwrap().unwrap();
        assert_eq!(info.registry_path, "repo/argoexec");

        let ctx = HookContext::new(
            ScriptedTools::default().fail("resource-get oci-image", "resource not found"),
            None,
        );
        assert_eq!(ctx.image_info().unwrap(), None);
    }

    #[test]
    fn status_set_failures_are_swallowed() {
        let ctx = HookContext::new(
            ScriptedTools::default().fail("status-set waiting Waiting.", "boom"),
            None,
        );
        ctx.report_status(Status {
            phase: StatusPhase::Waiting,
            message: "Waiting.".into(),
        });
        assert_eq!(ctx.runner().calls.lock().as_slice(), ["status-set waiting Waiting."]);
    }
}
