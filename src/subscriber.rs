//! Event sources that drive the [`Controller`](crate::runner::Controller).

use std::fmt;

use crate::relation::MINIO_ENDPOINT;

/// A lifecycle event. Every event triggers a fresh evaluation;
/// some also invalidate a previous submission first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The charm was upgraded or a resource was attached.
    UpgradeCharm,
    /// Charm options changed.
    ConfigChanged,
    /// The OCI image resource changed.
    ImageChanged,
    /// Leadership was gained or lost.
    LeadershipChanged,
    /// Units joined, left or changed data on the minio relation.
    RelationChanged,
    /// A resource this charm deployed disappeared from the cluster.
    ResourcesDrifted,
    /// Any other hook, or a periodic wake-up.
    Tick(Option<String>),
}

impl Event {
    /// Maps a Juju hook name to an event.
    pub fn from_hook_name(hook: &str) -> Self {
        match hook {
            "upgrade-charm" => Self::UpgradeCharm,
            "config-changed" => Self::ConfigChanged,
            "leader-elected" | "leader-settings-changed" => Self::LeadershipChanged,
            _ => match hook
                .strip_prefix(MINIO_ENDPOINT)
                .and_then(|rest| rest.strip_prefix("-relation-"))
            {
                Some("created" | "joined" | "changed" | "departed" | "broken") => {
                    Self::RelationChanged
                }
                _ => Self::Tick(Some(hook.to_owned())),
            },
        }
    }

    /// Whether the event clears a previous submission.
    pub fn invalidates(&self) -> bool {
        matches!(
            self,
            Self::UpgradeCharm | Self::ConfigChanged | Self::ImageChanged | Self::ResourcesDrifted
        )
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UpgradeCharm => f.write_str("upgrade-charm"),
            Self::ConfigChanged => f.write_str("config-changed"),
            Self::ImageChanged => f.write_str("image-changed"),
            Self::LeadershipChanged => f.write_str("leadership-changed"),
            Self::RelationChanged => f.write_str("relation-changed"),
            Self::ResourcesDrifted => f.write_str("resources-drifted"),
            Self::Tick(Some(hook)) => write!(f, "tick ({hook})"),
            Self::Tick(None) => f.write_str("tick"),
        }
    }
}

pub mod objects;
pub use objects::{crd_deletions, mirror};

pub mod poll;
pub use poll::poll;
