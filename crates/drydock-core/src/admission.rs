//! Resource admission — decides whether one container fits on one host.
//!
//! [`admit`] is the pure policy. [`Ledger`] is the bookkeeping that feeds
//! it: live containers keyed by runtime ID plus in-flight reservations.
//! Owners (cluster engines and host-side slaves) keep a `Ledger` behind a
//! lock so that every admission decision sees a consistent snapshot.

use std::collections::{BTreeSet, HashMap, HashSet};

use thiserror::Error;

use crate::types::{Container, ContainerId, Resources};

/// Why a container was refused by the resource accountant.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AdmissionError {
    #[error(
        "resources not available to run: requested {requested_cpus} cpus / {requested_memory} MB, \
         free {free_cpus} cpus / {free_memory} MB"
    )]
    NotEnoughResources {
        requested_cpus: f64,
        requested_memory: f64,
        free_cpus: f64,
        free_memory: f64,
    },

    #[error("persistent storage not supported")]
    VolumesNotSupported,

    #[error("profiler not supported")]
    ProfilerNotSupported,

    #[error("invalid resource request: cpus={cpus}, memory={memory}")]
    InvalidResources { cpus: f64, memory: f64 },
}

/// Decide whether `container` may run on a host with `capacity` of which
/// `reserved` is already spoken for.
///
/// Checks run in a fixed order: volumes, request validity, headroom,
/// profiling. Headroom must stay strictly positive on both axes after
/// the request is subtracted.
pub fn admit(
    capacity: &Resources,
    reserved: &Resources,
    container: &Container,
) -> Result<(), AdmissionError> {
    if !container.volumes.is_empty() {
        return Err(AdmissionError::VolumesNotSupported);
    }

    let requested = container.requested();
    if !requested.is_valid_request() {
        return Err(AdmissionError::InvalidResources {
            cpus: requested.cpus,
            memory: requested.memory,
        });
    }

    let free = *capacity - *reserved;
    let allocate = free.cpus - requested.cpus > 0.0 && free.memory - requested.memory > 0.0;
    if !allocate {
        return Err(AdmissionError::NotEnoughResources {
            requested_cpus: requested.cpus,
            requested_memory: requested.memory,
            free_cpus: free.cpus,
            free_memory: free.memory,
        });
    }

    if container.profile {
        return Err(AdmissionError::ProfilerNotSupported);
    }

    Ok(())
}

/// Ticket for a pending reservation held by a [`Ledger`].
pub type ReservationId = u64;

/// Containers tracked on one host, plus reservations for placements
/// whose runtime calls are still in flight.
/// A reservation whose container is not running yet.
#[derive(Debug, Clone)]
struct Pending {
    name: String,
    resources: Resources,
}

#[derive(Debug, Default)]
pub struct Ledger {
    containers: HashMap<ContainerId, Container>,
    pending: HashMap<ReservationId, Pending>,
    next_ticket: ReservationId,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sum of live containers and pending reservations.
    pub fn reserved(&self) -> Resources {
        let live: Resources = self.containers.values().map(Container::requested).sum();
        let pending: Resources = self.pending.values().map(|p| p.resources).sum();
        live + pending
    }

    /// Run admission against the current reservations without recording anything.
    pub fn can_admit(&self, capacity: &Resources, container: &Container) -> Result<(), AdmissionError> {
        admit(capacity, &self.reserved(), container)
    }

    /// Admit `container` and hold its resources until [`confirm`] or [`release`].
    ///
    /// [`confirm`]: Ledger::confirm
    /// [`release`]: Ledger::release
    pub fn reserve(
        &mut self,
        capacity: &Resources,
        container: &Container,
    ) -> Result<ReservationId, AdmissionError> {
        self.can_admit(capacity, container)?;
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.pending.insert(
            ticket,
            Pending {
                name: container.name.clone(),
                resources: container.requested(),
            },
        );
        Ok(ticket)
    }

    /// Turn a reservation into a tracked container under `id`.
    ///
    /// The reservation disappears and the container appears in the same
    /// step, so the reserved total never dips in between.
    pub fn confirm(&mut self, ticket: ReservationId, id: ContainerId, container: Container) {
        self.pending.remove(&ticket);
        self.containers.insert(id, container);
    }

    /// Drop a reservation. Returns false if the ticket was unknown.
    pub fn release(&mut self, ticket: ReservationId) -> bool {
        self.pending.remove(&ticket).is_some()
    }

    /// Stop tracking a container.
    pub fn evict(&mut self, id: &str) -> Option<Container> {
        self.containers.remove(id)
    }

    pub fn get(&self, id: &str) -> Option<&Container> {
        self.containers.get(id)
    }

    /// Find the tracked container `query` refers to, by runtime ID or name.
    pub fn find(&self, query: &Container) -> Option<(&ContainerId, &Container)> {
        if let Some(id) = &query.id {
            if let Some(found) = self.containers.get_key_value(id) {
                return Some(found);
            }
        }
        self.containers.iter().find(|(_, c)| c.matches(query))
    }

    /// Tracked containers ordered by name, then ID.
    pub fn containers(&self) -> Vec<Container> {
        let mut all: Vec<Container> = self.containers.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        all
    }

    /// Names of tracked containers and of pending reservations.
    pub fn container_names(&self) -> BTreeSet<String> {
        self.containers
            .values()
            .map(|c| c.name.clone())
            .chain(self.pending.values().map(|p| p.name.clone()))
            .collect()
    }

    /// IDs of every tracked container.
    pub fn ids(&self) -> HashSet<ContainerId> {
        self.containers.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.containers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
