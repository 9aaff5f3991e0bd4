//! Offer tracker.
//!
//! Holds the offers the framework may currently act on. An offer leaves the
//! tracker when it is consumed (launch or decline), rescinded, expired, or
//! when the link to the master is lost.
//!
//! Validation and consumption are separate steps so the facade can send the
//! outbound message between them and leave the tracker untouched if the send
//! fails.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use skiff_id::{AgentId, OfferId};
use skiff_protocol::{Filters, Offer, Resources, TaskInfo};
use tokio::time::Instant;
use tracing::debug;

use crate::error::{DriverError, DriverResult};

/// An offer held by the tracker.
#[derive(Debug, Clone)]
pub struct TrackedOffer {
    pub offer: Offer,
    pub received_at: Instant,
}

/// A validated set of offers from a single agent.
#[derive(Debug, Clone)]
pub struct OfferSelection {
    pub agent_id: AgentId,
    pub offer_ids: Vec<OfferId>,
    pub resources: Resources,
}

impl OfferSelection {
    /// Checks that `tasks` target this selection's agent and fit inside its
    /// aggregated resources.
    pub fn admit(&self, tasks: &[TaskInfo]) -> DriverResult<()> {
        let mut requested = Resources::default();
        let mut seen = HashSet::new();

        for task in tasks {
            task.validate()?;

            if !seen.insert(&task.task_id) {
                return Err(DriverError::InvalidArgument(format!(
                    "duplicate task id {}",
                    task.task_id
                )));
            }

            if task.agent_id != self.agent_id {
                return Err(DriverError::AgentMismatch {
                    expected: self.agent_id.clone(),
                    actual: task.agent_id.clone(),
                });
            }

            // Ports and set items are exclusive, so one may not be claimed twice
            for resource in &task.resources {
                let claim = Resources::sum(std::slice::from_ref(resource))?;
                if requested.overlaps(&claim) {
                    return Err(DriverError::InsufficientResources {
                        requested: format!("{claim} (claimed twice)"),
                        offered: self.resources.to_string(),
                    });
                }
                requested.merge(&claim);
            }
        }

        if !self.resources.contains(&requested) {
            return Err(DriverError::InsufficientResources {
                requested: requested.to_string(),
                offered: self.resources.to_string(),
            });
        }

        Ok(())
    }
}

/// Tracks valid offers and the agents they belong to.
#[derive(Debug, Default)]
pub struct OfferTracker {
    offers: HashMap<OfferId, TrackedOffer>,

    /// Agents the framework has applied refusal filters to since the last revive.
    filtered_agents: HashSet<AgentId>,

    ttl: Option<Duration>,
}

impl OfferTracker {
    /// Create a tracker; offers older than `ttl` count as rescinded.
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            offers: HashMap::new(),
            filtered_agents: HashSet::new(),
            ttl,
        }
    }

    /// Record a batch of newly received offers.
    pub fn add_batch(&mut self, offers: &[Offer], now: Instant) {
        for offer in offers {
            let previous = self.offers.insert(
                offer.id.clone(),
                TrackedOffer {
                    offer: offer.clone(),
                    received_at: now,
                },
            );
            if previous.is_some() {
                debug!(offer_id = %offer.id, "Offer re-sent by master, replacing");
            }
        }
    }

    /// Remove a rescinded offer. Returns false if it was not held.
    pub fn rescind(&mut self, offer_id: &OfferId) -> bool {
        self.offers.remove(offer_id).is_some()
    }

    /// Validate that `offer_ids` can be consumed together.
    ///
    /// All offers must be known, unexpired, distinct, and from one agent.
    pub fn select(&self, offer_ids: &[OfferId], now: Instant) -> DriverResult<OfferSelection> {
        if offer_ids.is_empty() {
            return Err(DriverError::InvalidArgument(
                "at least one offer id is required".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        let mut agent_id: Option<&AgentId> = None;
        let mut resources = Resources::default();

        for offer_id in offer_ids {
            if !seen.insert(offer_id) {
                return Err(DriverError::InvalidArgument(format!(
                    "offer {offer_id} listed more than once"
                )));
            }

            let tracked = self
                .offers
                .get(offer_id)
                .filter(|t| !self.is_expired(t, now))
                .ok_or_else(|| DriverError::UnknownOffer(offer_id.clone()))?;

            match agent_id {
                None => agent_id = Some(&tracked.offer.agent_id),
                Some(expected) if *expected != tracked.offer.agent_id => {
                    return Err(DriverError::AgentMismatch {
                        expected: expected.clone(),
                        actual: tracked.offer.agent_id.clone(),
                    });
                }
                Some(_) => {}
            }

            resources.merge(&Resources::sum(&tracked.offer.resources)?);
        }

        let agent_id = agent_id
            .cloned()
            .ok_or_else(|| DriverError::InvalidArgument("no offers selected".to_string()))?;

        Ok(OfferSelection {
            agent_id,
            offer_ids: offer_ids.to_vec(),
            resources,
        })
    }

    /// Remove every offer in a selection.
    pub fn consume(&mut self, selection: &OfferSelection, filters: &Filters) {
        for offer_id in &selection.offer_ids {
            self.offers.remove(offer_id);
        }
        if filters.is_refusing() {
            self.filtered_agents.insert(selection.agent_id.clone());
        }
    }

    /// Forget all filters. Returns how many agents were filtered.
    pub fn revive(&mut self) -> usize {
        let cleared = self.filtered_agents.len();
        self.filtered_agents.clear();
        cleared
    }

    /// Drop offers older than the TTL. Returns the dropped IDs.
    pub fn purge_expired(&mut self, now: Instant) -> Vec<OfferId> {
        let Some(ttl) = self.ttl else {
            return Vec::new();
        };

        let expired: Vec<OfferId> = self
            .offers
            .iter()
            .filter(|(_, t)| now.saturating_duration_since(t.received_at) >= ttl)
            .map(|(id, _)| id.clone())
            .collect();

        for offer_id in &expired {
            self.offers.remove(offer_id);
        }
        expired
    }

    /// Drop every offer. Returns how many were held.
    pub fn clear(&mut self) -> usize {
        let count = self.offers.len();
        self.offers.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.offers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offers.is_empty()
    }

    /// IDs of all currently held offers, sorted.
    pub fn offer_ids(&self) -> Vec<OfferId> {
        let mut ids: Vec<OfferId> = self.offers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn filtered_agents(&self) -> &HashSet<AgentId> {
        &self.filtered_agents
    }

    fn is_expired(&self, tracked: &TrackedOffer, now: Instant) -> bool {
        self.ttl
            .is_some_and(|ttl| now.saturating_duration_since(tracked.received_at) >= ttl)
    }
}

// =============================================================================
// Tests
// =============================================================================
