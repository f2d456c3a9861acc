//! Prometheus text exposition format.
//!
//! Renders per-node gauges into the Prometheus text exposition format
//! for scraping by a Prometheus server or compatible agent.

use edgegrid_state::{MetricSample, Node, NodeStatus};

/// One node's exposition input: its record, latest sample, and tenant count.
#[derive(Debug, Clone)]
pub struct NodeGauge {
    pub node: Node,
    pub latest: Option<MetricSample>,
    pub active_tenants: usize,
}

fn status_value(status: NodeStatus) -> u8 {
    match status {
        NodeStatus::Offline => 0,
        NodeStatus::Online => 1,
        NodeStatus::Maintenance => 2,
        NodeStatus::Error => 3,
    }
}

/// Render node gauges into Prometheus text format.
///
/// Produces GAUGE metrics with `node` labels. Nodes without samples only
/// report status and tenant count.
pub fn render_prometheus(gauges: &[NodeGauge]) -> String {
    let mut out = String::new();

    out.push_str(
        "# HELP edgegrid_node_status Node status (0=offline 1=online 2=maintenance 3=error).\n",
    );
    out.push_str("# TYPE edgegrid_node_status gauge\n");
    for g in gauges {
        out.push_str(&format!(
            "edgegrid_node_status{{node=\"{}\"}} {}\n",
            g.node.id,
            status_value(g.node.status)
        ));
    }

    out.push_str("# HELP edgegrid_node_active_tenants Active tenant assignments.\n");
    out.push_str("# TYPE edgegrid_node_active_tenants gauge\n");
    for g in gauges {
        out.push_str(&format!(
            "edgegrid_node_active_tenants{{node=\"{}\"}} {}\n",
            g.node.id, g.active_tenants
        ));
    }

    let sampled: Vec<(&Node, &MetricSample)> = gauges
        .iter()
        .filter_map(|g| g.latest.as_ref().map(|s| (&g.node, s)))
        .collect();

    out.push_str("# HELP edgegrid_node_cpu_usage CPU utilization percent.\n");
    out.push_str("# TYPE edgegrid_node_cpu_usage gauge\n");
    for (node, s) in &sampled {
        out.push_str(&format!(
            "edgegrid_node_cpu_usage{{node=\"{}\"}} {:.2}\n",
            node.id, s.metrics.cpu_usage
        ));
    }

    out.push_str("# HELP edgegrid_node_memory_usage Memory utilization percent.\n");
    out.push_str("# TYPE edgegrid_node_memory_usage gauge\n");
    for (node, s) in &sampled {
        out.push_str(&format!(
            "edgegrid_node_memory_usage{{node=\"{}\"}} {:.2}\n",
            node.id, s.metrics.memory_usage
        ));
    }

    out.push_str("# HELP edgegrid_node_bandwidth_bytes Byte rate by direction.\n");
    out.push_str("# TYPE edgegrid_node_bandwidth_bytes gauge\n");
    for (node, s) in &sampled {
        out.push_str(&format!(
            "edgegrid_node_bandwidth_bytes{{node=\"{}\",direction=\"up\"}} {}\n",
            node.id, s.metrics.bandwidth_up
        ));
        out.push_str(&format!(
            "edgegrid_node_bandwidth_bytes{{node=\"{}\",direction=\"down\"}} {}\n",
            node.id, s.metrics.bandwidth_down
        ));
    }

    out.push_str("# HELP edgegrid_node_active_connections Active tunnel connections.\n");
    out.push_str("# TYPE edgegrid_node_active_connections gauge\n");
    for (node, s) in &sampled {
        out.push_str(&format!(
            "edgegrid_node_active_connections{{node=\"{}\"}} {}\n",
            node.id, s.metrics.active_connections
        ));
    }

    out
}
