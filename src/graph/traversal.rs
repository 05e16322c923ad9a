//! Bounded BFS over the OPERATED_BY network.

use std::collections::{HashSet, VecDeque};

use serde::Serialize;

use super::model::{Label, Relation, VertexKey};
use super::store::GraphStore;
use crate::Result;

/// One OPERATED_BY edge discovered during expansion.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct NetworkLink {
    pub phone: String,
    pub vpa: String,
}

/// Expand outward from `start`, alternating Phone -> UpiVpa -> Phone.
/// Returns each distinct link found within `max_depth` hops, in discovery order.
pub async fn traverse_network(
    store: &dyn GraphStore,
    start: &VertexKey,
    max_depth: usize,
) -> Result<Vec<NetworkLink>> {
    let mut visited = HashSet::new();
    let mut seen_links = HashSet::new();
    let mut queue = VecDeque::new();
    let mut result = Vec::new();

    queue.push_back((start.clone(), 0));
    visited.insert(start.clone());

    while let Some((vertex, depth)) = queue.pop_front() {
        if depth >= max_depth {
            continue;
        }

        let neighbors = match vertex.label {
            Label::Phone => store.out_neighbors(&vertex, Relation::OperatedBy).await?,
            Label::UpiVpa => store.in_neighbors(&vertex, Relation::OperatedBy).await?,
            Label::FraudEvent => continue,
        };

        for neighbor in neighbors {
            let next = neighbor.key();
            let link = match vertex.label {
                Label::Phone => NetworkLink { phone: vertex.key.clone(), vpa: next.key.clone() },
                _ => NetworkLink { phone: next.key.clone(), vpa: vertex.key.clone() },
            };
            if seen_links.insert(link.clone()) {
                result.push(link);
            }
            if visited.insert(next.clone()) {
                queue.push_back((next, depth + 1));
            }
        }
    }

    Ok(result)
}
