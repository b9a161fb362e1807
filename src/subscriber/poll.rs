use std::{collections::VecDeque, time::Duration};

use futures::{stream, Stream};

use super::Event;
use crate::{
    context::{CharmConfig, Context},
    image::ImageInfo,
    relation::RelationUnit,
    Error,
};

/// Everything the controller's decisions depend on, as observed at one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub config: CharmConfig,
    pub image: Option<ImageInfo>,
    pub leader: bool,
    pub minio_units: Option<Vec<RelationUnit>>,
}

impl Snapshot {
    pub fn take<C: Context>(ctx: &C) -> Result<Self, Error> {
        Ok(Self {
            config: ctx.charm_config()?,
            image: ctx.image_info()?,
            leader: ctx.is_leader()?,
            minio_units: ctx.minio_units()?,
        })
    }

    /// Events describing how `self` differs from `prev`.
    pub fn diff(&self, prev: &Self) -> Vec<Event> {
        let mut events = Vec::new();
        if self.config != prev.config {
            events.push(Event::ConfigChanged);
        }
        if self.image != prev.image {
            events.push(Event::ImageChanged);
        }
        if self.leader != prev.leader {
            events.push(Event::LeadershipChanged);
        }
        if self.minio_units != prev.minio_units {
            events.push(Event::RelationChanged);
        }
        events
    }
}

struct PollState<C> {
    ctx: C,
    period: Duration,
    last: Option<Snapshot>,
    pending: VecDeque<Event>,
}

/// Polls the context every `period` and emits events for observed changes.
///
/// The first poll always yields [`Event::Tick`] so the controller evaluates once on startup.
pub fn poll<C: Context>(ctx: C, period: Duration) -> impl Stream<Item = Result<Event, Error>> {
    let state = PollState {
        ctx,
        period,
        last: None,
        pending: VecDeque::new(),
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                return Some((Ok(event), state));
            }

            if state.last.is_some() {
                tokio::time::sleep(state.period).await;
            }

            let snapshot = match Snapshot::take(&state.ctx) {
                Ok(snapshot) => snapshot,
                Err(err) => return Some((Err(err), state)),
            };
            match &state.last {
                None => state.pending.push_back(Event::Tick(None)),
                Some(prev) => {
                    let events = snapshot.diff(prev);
                    if !events.is_empty() {
                        log::debug!("observed changes: {events:?}");
                    }
                    state.pending.extend(events);
                }
            }
            state.last = Some(snapshot);
        }
    })
}
