//! Entry point for the charm's hooks and its long-running watch mode.

use std::{
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
    time::Duration,
};

use clap::{Args, Parser, Subcommand};
use futures::{stream, StreamExt, TryStreamExt};
use k8s_openapi::{
    api::core::v1::{ConfigMap, Secret},
    apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition,
};
use kube_client::{Api, Client};
use kube_runtime::{reflector, watcher};
use tokio_util::sync::CancellationToken;

use argo_controller_charm::{
    image::ImageInfo,
    manifest::{ManifestDir, ManifestSource},
    reconciler::{ClusterReconciler, PodSpecSet},
    run,
    state::{FileStateStore, MemoryStateStore, Phase, StateStore},
    subscriber::{self, Event},
    ClusterContext, Controller, Error, HookContext, RunError,
};

/// Deploys the Argo Workflows controller with a Minio artifact repository
#[derive(Parser, Debug)]
#[command(name = "argo-controller-charm", version, about, long_about = None)]
struct Cli {
    /// Charm directory, containing `files/` with the CRD manifests
    #[arg(long, env = "JUJU_CHARM_DIR", default_value = ".")]
    charm_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Handle a single Juju hook
    ///
    /// The controller phase is kept in a state file in the charm directory
    /// and the pod spec is submitted with `pod-spec-set`.
    Hook {
        /// Hook name, e.g. `config-changed`
        #[arg(env = "JUJU_HOOK_NAME")]
        name: String,
    },

    /// Keep running outside of Juju, applying resources with server-side apply
    ///
    /// Charm options are read from the ConfigMap `<app>-charm-config` and the
    /// minio connection data (`ip`, `port`, `user`, `password`) from the
    /// Secret `<app>-minio`. Run a single replica per application.
    Watch(WatchArgs),
}

#[derive(Args, Debug)]
struct WatchArgs {
    /// Seconds between polls of config, leadership, image and relation data
    #[arg(long, default_value_t = 30)]
    interval: u64,

    /// Name for the service account, RBAC objects and deployment
    #[arg(long, default_value = "argo-controller")]
    app: String,

    /// Namespace to deploy into, defaults to the client's namespace
    #[arg(long, env = "POD_NAMESPACE")]
    namespace: Option<String>,

    /// Controller image
    #[arg(long, env = "ARGO_CONTROLLER_IMAGE")]
    image: Option<String>,

    #[arg(long, env = "ARGO_CONTROLLER_IMAGE_USERNAME", default_value = "")]
    image_username: String,

    #[arg(
        long,
        env = "ARGO_CONTROLLER_IMAGE_PASSWORD",
        default_value = "",
        hide_env_values = true
    )]
    image_password: String,
}

impl WatchArgs {
    fn image(&self) -> Option<ImageInfo> {
        self.image.clone().map(|registry_path| ImageInfo {
            registry_path,
            username: self.image_username.clone(),
            password: self.image_password.clone(),
        })
    }
}

fn by_name(name: &str) -> watcher::Config {
    watcher::Config::default().fields(&format!("metadata.name={name}"))
}

async fn hook(charm_dir: &Path, name: &str) -> Result<(), RunError<Error>> {
    let store = FileStateStore::in_dir(charm_dir);
    let phase = store.load().map_err(RunError::Handle)?;
    log::debug!("running hook {name} in phase {phase:?}");

    let mut controller = Controller::new(
        HookContext::from_env(),
        ManifestDir::new(charm_dir.join("files")),
        PodSpecSet::new(),
        phase,
    );
    let events = stream::iter([Ok(Event::from_hook_name(name))]);
    run(&mut controller, &store, events, CancellationToken::new()).await
}

async fn watch(charm_dir: &Path, args: WatchArgs) -> Result<(), RunError<Error>> {
    let client = Client::try_default()
        .await
        .map_err(|err| RunError::Handle(err.into()))?;
    let namespace = args
        .namespace
        .clone()
        .unwrap_or_else(|| client.default_namespace().to_owned());

    let manifests = ManifestDir::new(charm_dir.join("files"));
    let names = manifests
        .load()
        .map_err(RunError::Handle)?
        .names()
        .map(str::to_owned)
        .collect();

    let config_writer = reflector::store::Writer::<ConfigMap>::new(());
    let minio_writer = reflector::store::Writer::<Secret>::new(());
    let ctx = Arc::new(ClusterContext::new(
        namespace.clone(),
        args.app.clone(),
        args.image(),
        config_writer.as_reader(),
        minio_writer.as_reader(),
    ));

    let config = subscriber::mirror(
        Api::<ConfigMap>::namespaced(client.clone(), &namespace),
        by_name(&ClusterContext::config_map_name(&args.app)),
        config_writer,
    );
    let minio = subscriber::mirror(
        Api::<Secret>::namespaced(client.clone(), &namespace),
        by_name(&ClusterContext::minio_secret_name(&args.app)),
        minio_writer,
    );
    let crds = Api::<CustomResourceDefinition>::all(client.clone());
    let drift = subscriber::crd_deletions(crds, names);
    let polls = subscriber::poll(Arc::clone(&ctx), Duration::from_secs(args.interval));
    let events = stream::select_all([
        polls.boxed_local(),
        config.map_err(Error::from).boxed_local(),
        minio.map_err(Error::from).boxed_local(),
        drift.map_err(Error::from).boxed_local(),
    ]);

    let mut controller = Controller::new(
        ctx,
        manifests,
        ClusterReconciler::new(client, namespace, args.app),
        Phase::NotStarted,
    );

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                log::warn!("cannot listen for shutdown signal: {err}");
                return;
            }
            log::info!("shutting down");
            cancel.cancel();
        }
    });

    run(&mut controller, &MemoryStateStore::default(), events, cancel).await
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Hook { name } => hook(&cli.charm_dir, &name).await,
        Commands::Watch(args) => watch(&cli.charm_dir, args).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hook_name_is_positional() {
        let cli = Cli::try_parse_from([
            "argo-controller-charm",
            "--charm-dir",
            "/var/lib/charm",
            "hook",
            "config-changed",
        ])
        .unwrap();
        assert_eq!(cli.charm_dir, Path::new("/var/lib/charm"));
        assert!(matches!(cli.command, Commands::Hook { name } if name == "config-changed"));
    }

    #[test]
    fn watch_image_comes_from_flags() {
        let cli = Cli::try_parse_from([
            "argo-controller-charm",
            "watch",
            "--image",
            "argoproj/workflow-controller:v2.12.8",
            "--image-username",
            "u",
        ])
        .unwrap();
        let Commands::Watch(args) = cli.command else {
            panic!("expected watch");
        };
        assert_eq!(args.interval, 30);
        assert_eq!(args.app, "argo-controller");
        let image = args.image().unwrap();
        assert_eq!(image.registry_path, "argoproj/workflow-controller:v2.12.8");
        assert_eq!(image.username, "u");
        assert_eq!(image.password, "");
    }

    /// Juju runs `dispatch` for every hook, with the hook path in `JUJU_DISPATCH_PATH`.
    #[test]
    fn dispatch_runs_the_hook_subcommand() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("dispatch");
        let script = std::fs::read_to_string(path).unwrap();
        assert!(script.starts_with("#!/bin/sh\n"));
        assert!(script.contains(r#"hook "${JUJU_DISPATCH_PATH##*/}""#));
    }
}
