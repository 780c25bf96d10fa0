//! Batching policy for bulk index requests
//!
//! A stream batch can carry several changes to the same asset. Only the
//! newest change per inventory ID is worth sending, and the remaining actions
//! are split into bulk requests bounded by action count and payload size.

use std::collections::HashMap;

use crate::models::IndexAction;

/// Approximate bytes taken by one bulk action header line
const HEADER_OVERHEAD: usize = 160;

/// Upper bounds for a single bulk request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    pub max_actions: usize,
    pub max_bytes: usize,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            max_actions: 500,
            max_bytes: 5 * 1024 * 1024,
        }
    }
}

/// Keep one action per inventory ID
///
/// The action with the highest version wins; for equal versions the later
/// action in input order wins. Output follows the position of each ID's last
/// occurrence.
pub fn coalesce(actions: Vec<IndexAction>) -> Vec<IndexAction> {
    let mut winners: HashMap<String, (usize, IndexAction)> = HashMap::with_capacity(actions.len());

    for (position, action) in actions.into_iter().enumerate() {
        match winners.get_mut(&action.inventory_id) {
            Some(entry) => {
                let keep_existing = entry.1.version > action.version;
                entry.0 = position;
                if !keep_existing {
                    entry.1 = action;
                }
            }
            None => {
                winners.insert(action.inventory_id.clone(), (position, action));
            }
        }
    }

    let mut ordered: Vec<(usize, IndexAction)> = winners.into_values().collect();
    ordered.sort_by_key(|(position, _)| *position);
    ordered.into_iter().map(|(_, action)| action).collect()
}

/// Serialized size of an action in a bulk body
pub fn encoded_size(action: &IndexAction) -> usize {
    let document = action
        .document
        .as_ref()
        .and_then(|d| serde_json::to_vec(d).ok())
        .map(|d| d.len() + 1)
        .unwrap_or(0);
    HEADER_OVERHEAD + action.inventory_id.len() + document
}

/// Split actions into bulk requests, preserving order
///
/// An action larger than `max_bytes` is sent in a request of its own.
pub fn plan_batches(actions: Vec<IndexAction>, limits: &BatchLimits) -> Vec<Vec<IndexAction>> {
    let max_actions = limits.max_actions.max(1);
    let mut batches = Vec::new();
    let mut current: Vec<IndexAction> = Vec::new();
    let mut current_bytes = 0;

    for action in actions {
        let size = encoded_size(&action);
        let over_count = current.len() >= max_actions;
        let over_bytes = !current.is_empty() && current_bytes + size > limits.max_bytes;

        if over_count || over_bytes {
            batches.push(std::mem::take(&mut current));
            current_bytes = 0;
        }

        current_bytes += size;
        current.push(action);
    }

    if !current.is_empty() {
        batches.push(current);
    }

    batches
}
