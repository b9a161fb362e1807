//! argo-controller-charm deploys the Argo Workflows controller from a Juju charm,
//! storing workflow artifacts in a related Minio.
//!
//! Once this unit leads and the minio relation carries full connection data,
//! the [`Controller`] composes a pod spec for the controller
//! (container, RBAC rules, mounted config file, CRDs and the artifact secret)
//! and submits it through a [`reconciler::Reconciler`].
//! The controller then stays started until an upgrade, a config change or
//! an image change invalidates the submission.
//!
//! Events come from the hook being run ([`subscriber::Event::from_hook_name`]),
//! or in long-running mode from [`subscriber::poll`] and [`subscriber::crd_deletions`].

pub mod context;
pub use context::{CharmConfig, ClusterContext, Context, HookContext, Status};
mod error;
pub use error::Error;
pub mod image;
pub mod manifest;
pub mod podspec;
pub mod reconciler;
pub mod relation;
mod runner;
pub use runner::{run, Controller, Outcome, RunError};
pub mod state;
pub mod subscriber;
