//! Node selection for tenant placement.

use std::collections::HashMap;

use edgegrid_state::{Node, NodeId, NodeStatus};

/// Pick the node for a new assignment.
///
/// Eligible nodes are `Online`, not removed, and below their `max_tenants`
/// capability when they declare one. Among those the node with the fewest
/// active assignments wins; ties go to the lowest node id.
pub fn select_node<'a>(nodes: &'a [Node], load: &HashMap<NodeId, usize>) -> Option<&'a Node> {
    nodes
        .iter()
        .filter(|n| n.status == NodeStatus::Online && !n.is_removed())
        .map(|n| (n, load.get(&n.id).copied().unwrap_or(0)))
        .filter(|(n, active)| n.max_tenants().is_none_or(|max| *active < max))
        .min_by(|(a, a_load), (b, b_load)| a_load.cmp(b_load).then_with(|| a.id.cmp(&b.id)))
        .map(|(n, _)| n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgegrid_state::{MAX_TENANTS_CAPABILITY, NodeAddress, NodeDescriptor};

    fn node(id: &str, status: NodeStatus) -> Node {
        let mut n = Node::from_descriptor(NodeDescriptor::new(NodeAddress::new(id, 1)), 0);
        n.id = id.to_string();
        n.status = status;
        n
    }

    #[test]
    fn picks_least_loaded() {
        let nodes = vec![node("a", NodeStatus::Online), node("b", NodeStatus::Online)];
        let load = HashMap::from([("a".to_string(), 3), ("b".to_string(), 1)]);
        assert_eq!(select_node(&nodes, &load).unwrap().id, "b");
    }

    #[test]
    fn ties_break_by_node_id() {
        let nodes = vec![node("c", NodeStatus::Online), node("a", NodeStatus::Online)];
        assert_eq!(select_node(&nodes, &HashMap::new()).unwrap().id, "a");
    }

    #[test]
    fn skips_non_online_nodes() {
        let nodes = vec![
            node("a", NodeStatus::Maintenance),
            node("b", NodeStatus::Error),
            node("c", NodeStatus::Offline),
        ];
        assert!(select_node(&nodes, &HashMap::new()).is_none());
    }

    #[test]
    fn honours_max_tenants() {
        let mut full = node("a", NodeStatus::Online);
        full.capabilities.insert(MAX_TENANTS_CAPABILITY.into(), "2".into());
        let nodes = vec![full, node("b", NodeStatus::Online)];
        let load = HashMap::from([("a".to_string(), 2), ("b".to_string(), 5)]);
        assert_eq!(select_node(&nodes, &load).unwrap().id, "b");
    }
}
