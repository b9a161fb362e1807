//! Persistence of the controller phase between hook invocations.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::Error;

/// Whether the pod spec has been submitted since the last invalidation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    #[default]
    NotStarted,
    Started,
}

pub trait StateStore {
    fn load(&self) -> Result<Phase, Error>;

    fn save(&self, phase: Phase) -> Result<(), Error>;
}

#[derive(Serialize, Deserialize)]
struct Persisted {
    phase: Phase,
}

/// Stores the phase as a small JSON document. A missing file means [`Phase::NotStarted`].
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub const FILE_NAME: &'static str = ".argo-controller-state.json";

    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The default location inside a charm directory.
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(Self::FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateStore for FileStateStore {
    fn load(&self) -> Result<Phase, Error> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(serde_json::from_slice::<Persisted>(&bytes)?.phase),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Phase::default()),
            Err(err) => Err(err.into()),
        }
    }

    fn save(&self, phase: Phase) -> Result<(), Error> {
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec(&Persisted { phase })?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// In-process store for long-running mode.
#[derive(Debug, Default)]
pub struct MemoryStateStore(Mutex<Phase>);

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<Phase, Error> {
        Ok(*self.0.lock())
    }

    fn save(&self, phase: Phase) -> Result<(), Error> {
        *self.0.lock() = phase;
        Ok(())
    }
}
