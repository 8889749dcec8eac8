//! Graphviz export of dependency graphs.

use std::fmt::Write;

use indexmap::IndexMap;
use pretvm_core::Environment;

use crate::dag::{DependencyGraph, EdgeKind, NodeKey};
use crate::levels::Levelization;

const CORE_COLORS: &[&str] = &[
    "lightblue", "lightsalmon", "palegreen", "khaki", "plum", "lightcyan", "wheat", "pink",
];

#[derive(Debug, Default)]
pub struct DotOptions<'a> {
    pub title: Option<&'a str>,
    /// Group nodes into one rank per level.
    pub levels: Option<&'a Levelization>,
    /// Color nodes by assigned core.
    pub partition: Option<&'a IndexMap<NodeKey, usize>>,
}

fn node_id(node: NodeKey) -> String {
    match node {
        NodeKey::Reaction(r) => format!("r{}", r.0),
        NodeKey::Transfer(c) => format!("c{}", c.0),
    }
}

fn node_label(env: &Environment, node: NodeKey) -> String {
    match node {
        NodeKey::Reaction(r) => env.reaction(r).full_name.clone(),
        NodeKey::Transfer(c) => {
            let conn = env.connection(c);
            format!("{} -> {}", env.port(conn.source).full_name, env.port(conn.destination).full_name)
        }
    }
}

pub fn to_dot(graph: &DependencyGraph, env: &Environment, options: &DotOptions<'_>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "digraph \"{}\" {{", options.title.unwrap_or("dependencies"));
    let _ = writeln!(out, "  rankdir=TB;");
    let _ = writeln!(out, "  node [fontname=\"monospace\", fontsize=10];");

    for node in &graph.nodes {
        let shape = match node {
            NodeKey::Reaction(_) => "box",
            NodeKey::Transfer(_) => "ellipse",
        };
        let mut attrs = format!("label=\"{}\", shape={}", node_label(env, *node), shape);
        if let Some(core) = options.partition.and_then(|p| p.get(node)) {
            let color = CORE_COLORS[core % CORE_COLORS.len()];
            let _ = write!(attrs, ", style=filled, fillcolor={}, xlabel=\"core {}\"", color, core);
        }
        let _ = writeln!(out, "  {} [{}];", node_id(*node), attrs);
    }

    if let Some(levels) = options.levels {
        for level in &levels.levels {
            let ids: Vec<String> = level.iter().map(|n| node_id(*n)).collect();
            let _ = writeln!(out, "  {{ rank=same; {}; }}", ids.join("; "));
        }
    }

    for edge in &graph.edges {
        let mut attrs = Vec::new();
        match edge.kind {
            EdgeKind::Priority => attrs.push("style=dashed".to_string()),
            EdgeKind::Transfer(_) | EdgeKind::Port(_) => {}
        }
        if !edge.instantaneous {
            attrs.push("color=gray".to_string());
            attrs.push(format!("label=\"{}\"", edge.delay));
        }
        let suffix = if attrs.is_empty() { String::new() } else { format!(" [{}]", attrs.join(", ")) };
        let _ = writeln!(out, "  {} -> {}{};", node_id(edge.from), node_id(edge.to), suffix);
    }

    out.push_str("}\n");
    out
}
