//! Read-only investigative queries over the fraud graph.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;

use crate::config::Config;
use crate::error::Result;
use crate::graph::{
    traverse_network, Direction, GraphStore, Label, NetworkLink, Phone, Relation, UpiVpa, VertexKey,
};

pub const DEFAULT_RING_THRESHOLD: usize = 2;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpiInvestigation {
    pub found: bool,
    pub upi_data: Option<UpiVpa>,
    pub related_phones: Vec<Phone>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhoneInvestigation {
    pub found: bool,
    pub phone_data: Option<Phone>,
    pub operated_upis: Vec<UpiVpa>,
    pub is_ring: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkReport {
    pub root: VertexKey,
    pub found: bool,
    pub depth: usize,
    pub links: Vec<NetworkLink>,
}

/// Investigation queries. Holds the ring threshold so phone lookups and
/// ring detection classify a phone the same way.
#[derive(Clone)]
pub struct InvestigationService {
    store: Arc<dyn GraphStore>,
    ring_threshold: usize,
}

impl InvestigationService {
    pub fn new(store: Arc<dyn GraphStore>, ring_threshold: usize) -> Self {
        Self {
            store,
            ring_threshold: ring_threshold.max(1),
        }
    }

    pub fn from_config(config: &Config, store: Arc<dyn GraphStore>) -> Self {
        Self::new(store, config.graph.ring_threshold)
    }

    pub fn ring_threshold(&self) -> usize {
        self.ring_threshold
    }

    pub async fn investigate_upi(&self, vpa: &str) -> Result<UpiInvestigation> {
        let key = VertexKey::upi(vpa);
        let Some(vertex) = self.store.get_vertex(&key).await? else {
            return Ok(UpiInvestigation {
                found: false,
                upi_data: None,
                related_phones: Vec::new(),
            });
        };

        let related_phones = self
            .store
            .in_neighbors(&key, Relation::OperatedBy)
            .await?
            .into_iter()
            .filter_map(|v| v.into_phone())
            .collect();

        Ok(UpiInvestigation {
            found: true,
            upi_data: vertex.into_upi(),
            related_phones,
        })
    }

    pub async fn investigate_phone(&self, number: &str) -> Result<PhoneInvestigation> {
        let key = VertexKey::phone(number);
        let Some(vertex) = self.store.get_vertex(&key).await? else {
            return Ok(PhoneInvestigation {
                found: false,
                phone_data: None,
                operated_upis: Vec::new(),
                is_ring: false,
            });
        };

        let operated_upis: Vec<UpiVpa> = self
            .store
            .out_neighbors(&key, Relation::OperatedBy)
            .await?
            .into_iter()
            .filter_map(|v| v.into_upi())
            .collect();

        Ok(PhoneInvestigation {
            found: true,
            phone_data: vertex.into_phone(),
            is_ring: operated_upis.len() >= self.ring_threshold,
            operated_upis,
        })
    }

    /// Phones operating at least `threshold` payment addresses
    /// (the configured ring threshold when `None`).
    pub async fn find_scam_rings(&self, threshold: Option<usize>) -> Result<BTreeSet<String>> {
        let threshold = threshold.unwrap_or(self.ring_threshold);
        let phones = self
            .store
            .vertices_with_degree_at_least(Label::Phone, Relation::OperatedBy, Direction::Out, threshold)
            .await?;
        Ok(phones.iter().map(|v| v.natural_key().to_string()).collect())
    }

    /// Links reachable from a phone number or payment address within `max_depth` hops.
    pub async fn related_network(&self, identifier: &str, max_depth: usize) -> Result<NetworkReport> {
        let root = identifier_key(identifier);
        let found = self.store.get_vertex(&root).await?.is_some();
        let links = if found {
            traverse_network(self.store.as_ref(), &root, max_depth).await?
        } else {
            Vec::new()
        };

        Ok(NetworkReport {
            root,
            found,
            depth: max_depth,
            links,
        })
    }
}

/// Payment addresses always carry an `@`; anything else is read as a phone number.
pub fn identifier_key(identifier: &str) -> VertexKey {
    let identifier = identifier.trim();
    if identifier.contains('@') {
        VertexKey::upi(identifier)
    } else {
        VertexKey::phone(identifier)
    }
}
