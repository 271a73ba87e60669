//! Target-set resolution.
//!
//! Nodes registered under the `cascade` service are rolled either in plain
//! lexicographic order or, when the run-order manifest is present, grouped
//! by manifest tier with a lexicographic tiebreak inside each tier. Stable
//! ordering is what makes reruns reproducible.

use std::collections::HashSet;

use cascade_coordinator::Coordinator;
use tracing::debug;

use crate::error::RollError;

/// Catalog service every rollable node registers under.
pub const SERVICE_NAME: &str = "cascade";

/// KV path of the optional run-order manifest: a YAML sequence of role tags.
pub const RUN_ORDER_KEY: &str = "cascade/run_order";

/// Compute the ordered target list for `role` (empty = no role filter).
///
/// With a manifest, tiers are emitted in manifest order and nodes matching
/// no manifest tag are omitted. A node carrying several manifest tags is
/// emitted with the earliest tier that names it.
pub async fn resolve_nodes(
    coordinator: &dyn Coordinator,
    role: &str,
) -> Result<Vec<String>, RollError> {
    let nodes = coordinator.service_nodes(SERVICE_NAME, role).await?;
    let manifest = coordinator.kv_get(RUN_ORDER_KEY).await?;

    let result = match manifest {
        None => {
            let mut names: Vec<String> = nodes.iter().map(|n| n.node.clone()).collect();
            names.sort();
            names
        }
        Some(pair) => {
            let order: Vec<String> = serde_yaml::from_slice(&pair.value)?;
            debug!(?order, "applying run order manifest");

            let mut seen = HashSet::new();
            let mut result = Vec::new();
            for tag in &order {
                let mut tier: Vec<String> = nodes
                    .iter()
                    .filter(|n| n.service_tags.iter().any(|t| t == tag))
                    .filter(|n| !seen.contains(n.node.as_str()))
                    .map(|n| n.node.clone())
                    .collect();
                tier.sort();
                for name in &tier {
                    seen.insert(name.clone());
                }
                result.extend(tier);
            }
            result
        }
    };

    if result.is_empty() {
        return Err(RollError::NoNodes {
            role: role.to_string(),
        });
    }
    Ok(result)
}
