use std::fmt;

use futures::{Stream, StreamExt, TryStreamExt};
use tokio_util::sync::CancellationToken;

use crate::{
    context::{Context, Status},
    manifest::ManifestSource,
    podspec::{self, Inputs},
    reconciler::Reconciler,
    relation::{MinioRelation, NotReady},
    state::{Phase, StateStore},
    subscriber::Event,
    Error,
};

/// Result of evaluating one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The image is unavailable or the minio relation is not established.
    Idle,
    /// The pod spec was already submitted and nothing invalidated it.
    AlreadyStarted,
    /// Only the leader submits the pod spec, or even looks at its inputs.
    NotLeader,
    /// The minio relation is established but unusable.
    Waiting(NotReady),
    /// The pod spec was submitted by this evaluation.
    Started,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::AlreadyStarted => f.write_str("already started"),
            Self::NotLeader => f.write_str("not leader"),
            Self::Waiting(reason) => write!(f, "waiting: {reason}"),
            Self::Started => f.write_str("started"),
        }
    }
}

/// Drives the deployment of the workflow controller through [`Phase`]s.
///
/// Rendering happens only when the image is available, the minio relation
/// exists and the phase is [`Phase::NotStarted`]. A successful submission
/// moves to [`Phase::Started`]; invalidating events move back.
pub struct Controller<C, M, R> {
    ctx: C,
    manifests: M,
    reconciler: R,
    phase: Phase,
}

impl<C, M, R> Controller<C, M, R>
where
    C: Context,
    M: ManifestSource,
    R: Reconciler,
{
    pub fn new(ctx: C, manifests: M, reconciler: R, phase: Phase) -> Self {
        Self {
            ctx,
            manifests,
            reconciler,
            phase,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn context(&self) -> &C {
        &self.ctx
    }

    pub fn manifests(&self) -> &M {
        &self.manifests
    }

    pub fn reconciler(&self) -> &R {
        &self.reconciler
    }

    /// Applies `event` to the phase, then attempts to start if the gate is open.
    pub async fn handle(&mut self, event: &Event) -> Result<Outcome, Error> {
        log::debug!("handling {event} in phase {:?}", self.phase);
        if event.invalidates() {
            if self.phase == Phase::Started {
                log::info!("{event} invalidates the submitted pod spec");
            }
            self.phase = Phase::NotStarted;
        }

        let outcome = self.start().await?;
        if self.phase == Phase::Started {
            self.ctx.report_status(Status::active(""));
        }
        Ok(outcome)
    }

    async fn start(&mut self) -> Result<Outcome, Error> {
        if self.phase == Phase::Started {
            return Ok(Outcome::AlreadyStarted);
        }

        if !self.ctx.is_leader()? {
            log::info!("This unit is not a leader.");
            return Ok(Outcome::NotLeader);
        }

        let Some(image) = self.ctx.image_info()? else {
            log::debug!("image resource is not available");
            return Ok(Outcome::Idle);
        };
        let Some(units) = self.ctx.minio_units()? else {
            log::debug!("minio relation is not established");
            return Ok(Outcome::Idle);
        };

        self.ctx
            .report_status(Status::maintenance("configuring container"));

        let minio = match MinioRelation::from_units(&units) {
            Ok(minio) => minio,
            Err(reason) => {
                let message = match reason {
                    NotReady::NoUnits => "Waiting for minio relation.",
                    NotReady::Incomplete { .. } => "Waiting for full minio relation.",
                };
                log::info!("{reason}");
                self.ctx.report_status(Status::waiting(message));
                return Ok(Outcome::Waiting(reason));
            }
        };

        let config = self.ctx.charm_config()?;
        let namespace = self.ctx.model_name()?;
        let manifests = self.manifests.load()?;
        let document = podspec::compose(&Inputs {
            image: &image,
            minio: &minio,
            config: &config,
            namespace: &namespace,
            manifests: &manifests,
        })?;

        self.reconciler.pod_spec_set(&document).await?;
        self.ctx
            .report_status(Status::maintenance("creating container"));
        self.phase = Phase::Started;
        log::info!(
            "pod spec submitted with artifact endpoint {}",
            minio.endpoint()
        );
        Ok(Outcome::Started)
    }
}

/// The error type returned by [`run`].
#[derive(Debug, thiserror::Error)]
pub enum RunError<E> {
    #[error("event source failed: {0}")]
    Subscribe(E),
    #[error(transparent)]
    Handle(Error),
}

/// Feeds events to `controller` one at a time until the stream ends or `cancel` fires.
///
/// The phase is written to `store` after every successfully handled event that changed it.
/// An error from either the stream or the controller stops the loop.
pub async fn run<C, M, R, S, E>(
    controller: &mut Controller<C, M, R>,
    store: &impl StateStore,
    events: S,
    cancel: CancellationToken,
) -> Result<(), RunError<E>>
where
    C: Context,
    M: ManifestSource,
    R: Reconciler,
    S: Stream<Item = Result<Event, E>>,
{
    let events = events.take_until(cancel.cancelled());
    futures::pin_mut!(events);

    while let Some(event) = events.try_next().await.map_err(RunError::Subscribe)? {
        let before = controller.phase();
        let outcome = controller.handle(&event).await.map_err(RunError::Handle)?;
        log::debug!("{event}: {outcome}");
        if controller.phase() != before {
            store.save(controller.phase()).map_err(RunError::Handle)?;
        }
    }

    Ok(())
}
