//! Domain types shared across Drydock crates.
//!
//! Everything here is plain data: serializable, cloneable, and free of
//! locks or runtime handles. Live engine state lives in `drydock-cluster`.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::{Add, Sub};

/// Identifier of an engine in the cluster registry.
pub type EngineId = String;

/// Runtime-assigned container identifier.
pub type ContainerId = String;

// ── Resources ─────────────────────────────────────────────────────

/// A CPU/memory pair. Used for capacity, reservations, and requests.
///
/// `cpus` is in CPU shares of a whole core, `memory` in megabytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Resources {
    pub cpus: f64,
    pub memory: f64,
}

impl Resources {
    pub const ZERO: Resources = Resources { cpus: 0.0, memory: 0.0 };

    pub fn new(cpus: f64, memory: f64) -> Self {
        Self { cpus, memory }
    }

    /// True if neither component is negative, NaN, or infinite.
    pub fn is_valid_request(&self) -> bool {
        self.cpus.is_finite() && self.memory.is_finite() && self.cpus >= 0.0 && self.memory >= 0.0
    }
}

impl Add for Resources {
    type Output = Resources;

    fn add(self, rhs: Resources) -> Resources {
        Resources {
            cpus: self.cpus + rhs.cpus,
            memory: self.memory + rhs.memory,
        }
    }
}

impl Sub for Resources {
    type Output = Resources;

    fn sub(self, rhs: Resources) -> Resources {
        Resources {
            cpus: self.cpus - rhs.cpus,
            memory: self.memory - rhs.memory,
        }
    }
}

impl std::iter::Sum for Resources {
    fn sum<I: Iterator<Item = Resources>>(iter: I) -> Resources {
        iter.fold(Resources::ZERO, Add::add)
    }
}

// ── Container ─────────────────────────────────────────────────────

/// A workload request and, once placed, its runtime identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Container {
    /// Runtime-assigned ID, set when the container is started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ContainerId>,
    pub name: String,
    /// Image reference, optionally with a `:tag`.
    pub image: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub domainname: String,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    /// Requested CPU shares (fraction of a core allowed).
    #[serde(default)]
    pub cpus: f64,
    /// Requested memory in megabytes.
    #[serde(default)]
    pub memory: f64,
    #[serde(default)]
    pub volumes: Vec<String>,
    /// Label constraints the target engine must carry.
    #[serde(default)]
    pub labels: BTreeSet<String>,
    #[serde(default)]
    pub profile: bool,
    /// Engine the container runs on, set on successful placement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine_id: Option<EngineId>,
}

impl Container {
    /// A bare request for `image` under `name`, with no resource ask.
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            image: image.into(),
            hostname: String::new(),
            domainname: String::new(),
            environment: BTreeMap::new(),
            cpus: 0.0,
            memory: 0.0,
            volumes: Vec::new(),
            labels: BTreeSet::new(),
            profile: false,
            engine_id: None,
        }
    }

    pub fn with_resources(mut self, cpus: f64, memory: f64) -> Self {
        self.cpus = cpus;
        self.memory = memory;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.insert(label.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// The CPU/memory this container asks for.
    pub fn requested(&self) -> Resources {
        Resources::new(self.cpus, self.memory)
    }

    /// Environment formatted as `KEY=value` pairs, in key order.
    pub fn env_pairs(&self) -> Vec<String> {
        self.environment
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect()
    }

    /// True if this container is the one `other` refers to.
    ///
    /// A runtime ID on `other` is authoritative; otherwise names are compared.
    pub fn matches(&self, other: &Container) -> bool {
        match (&self.id, &other.id) {
            (Some(mine), Some(theirs)) => mine == theirs,
            _ => self.name == other.name,
        }
    }
}

// ── Engine ────────────────────────────────────────────────────────

/// Static description of a container-runtime endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineInfo {
    pub id: EngineId,
    /// Network address of the runtime endpoint.
    pub addr: String,
    /// Total CPU capacity in cores.
    pub cpus: f64,
    /// Total memory capacity in megabytes.
    pub memory: f64,
    #[serde(default)]
    pub labels: BTreeSet<String>,
}

impl EngineInfo {
    pub fn capacity(&self) -> Resources {
        Resources::new(self.cpus, self.memory)
    }
}

/// Point-in-time view of an engine, as handed to scheduler strategies.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSnapshot {
    pub id: EngineId,
    pub labels: BTreeSet<String>,
    pub capacity: Resources,
    /// Live containers plus in-flight reservations.
    pub reserved: Resources,
    pub container_names: BTreeSet<String>,
}

impl EngineSnapshot {
    /// Capacity left after current reservations (may be negative).
    pub fn free(&self) -> Resources {
        self.capacity - self.reserved
    }

    pub fn hosts(&self, name: &str) -> bool {
        self.container_names.contains(name)
    }
}

/// A confirmed placement: the started container and where it runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub container: Container,
    pub engine: EngineInfo,
}
