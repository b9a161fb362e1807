//! Typed access to the minio relation.

use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

/// Name of the relation endpoint the charm requires.
pub const MINIO_ENDPOINT: &str = "minio";

/// Data published by a single remote unit on a relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationUnit {
    /// Remote unit name, e.g. `minio/0`.
    pub unit: String,
    pub data: BTreeMap<String, String>,
}

impl RelationUnit {
    pub fn new(unit: impl Into<String>, data: BTreeMap<String, String>) -> Self {
        Self {
            unit: unit.into(),
            data,
        }
    }
}

/// Connection details of the Minio artifact store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinioRelation {
    pub ip: String,
    pub port: String,
    pub user: String,
    pub password: String,
}

/// Why the relation cannot be used yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotReady {
    /// The relation exists but no remote unit has joined.
    NoUnits,
    /// A unit joined but has not published every field.
    Incomplete { missing: Vec<&'static str> },
}

impl fmt::Display for NotReady {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoUnits => f.write_str("no minio unit has joined"),
            Self::Incomplete { missing } => {
                write!(f, "minio relation is missing {}", missing.join(", "))
            }
        }
    }
}

impl MinioRelation {
    const FIELDS: [&'static str; 4] = ["ip", "port", "user", "password"];

    /// Validates the first joined unit's data. Additional units are ignored.
    pub fn from_units(units: &[RelationUnit]) -> Result<Self, NotReady> {
        let first = units.first().ok_or(NotReady::NoUnits)?;
        if units.len() > 1 {
            log::debug!(
                "{} minio units joined, using data from {}",
                units.len(),
                first.unit
            );
        }
        Self::from_data(&first.data)
    }

    pub fn from_data(data: &BTreeMap<String, String>) -> Result<Self, NotReady> {
        let missing: Vec<_> = Self::FIELDS
            .into_iter()
            .filter(|field| data.get(*field).map_or(true, |value| value.is_empty()))
            .collect();
        if !missing.is_empty() {
            return Err(NotReady::Incomplete { missing });
        }

        let get = |field: &str| data.get(field).cloned().unwrap_or_default();
        Ok(Self {
            ip: get("ip"),
            port: get("port"),
            user: get("user"),
            password: get("password"),
        })
    }

    /// The S3 endpoint, `ip:port`.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}
