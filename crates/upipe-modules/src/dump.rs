// SPDX-FileCopyrightText: © 2026 Upipe-rs Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Pipeline graph dump to Graphviz DOT: one node per pipe, one edge per
//! established output link with the flow def as a label, with
//! user-supplied label functions. A debug contract only — not consumed
//! by any other part of the core.

use std::fmt::Write as _;

/// One pipe node in the graph, as seen from the outside: the dump utility
/// does not walk live pipe objects (that would need every pipe family
/// wired into this crate), it renders a caller-supplied description —
/// mirroring the original's "user-supplied label function" contract.
#[derive(Debug, Clone)]
pub struct DumpNode {
    pub id: u64,
    pub label: String,
}

/// One established output link between two pipes, with the negotiated
/// flow def (if any) as its edge label.
#[derive(Debug, Clone)]
pub struct DumpEdge {
    pub from: u64,
    pub to: u64,
    pub flow_def: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DumpGraph {
    pub nodes: Vec<DumpNode>,
    pub edges: Vec<DumpEdge>,
}

/// Render a [`DumpGraph`] as a Graphviz `dot` document.
#[must_use]
pub fn dump_dot(graph: &DumpGraph) -> String {
    let mut out = String::new();
    out.push_str("digraph upipe {\n");
    for node in &graph.nodes {
        let _ = writeln!(out, "  n{} [label=\"{}\"];", node.id, escape(&node.label));
    }
    for edge in &graph.edges {
        match &edge.flow_def {
            Some(def) => {
                let _ = writeln!(out, "  n{} -> n{} [label=\"{}\"];", edge.from, edge.to, escape(def));
            }
            None => {
                let _ = writeln!(out, "  n{} -> n{};", edge.from, edge.to);
            }
        }
    }
    out.push_str("}\n");
    out
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_one_node_per_pipe_and_one_edge_per_link() {
        let graph = DumpGraph {
            nodes: vec![
                DumpNode { id: 1, label: "ts_split".into() },
                DumpNode { id: 2, label: "psi_split \"PAT\"".into() },
            ],
            edges: vec![DumpEdge { from: 1, to: 2, flow_def: Some("block.mpegtspsi.pat.".into()) }],
        };
        let dot = dump_dot(&graph);
        assert!(dot.starts_with("digraph upipe {\n"));
        assert!(dot.contains("n1 [label=\"ts_split\"];"));
        assert!(dot.contains("psi_split \\\"PAT\\\""));
        assert!(dot.contains("n1 -> n2 [label=\"block.mpegtspsi.pat.\"];"));
        assert!(dot.trim_end().ends_with('}'));
    }

    #[test]
    fn edge_without_negotiated_flow_def_has_no_label() {
        let graph = DumpGraph {
            nodes: vec![DumpNode { id: 1, label: "a".into() }, DumpNode { id: 2, label: "b".into() }],
            edges: vec![DumpEdge { from: 1, to: 2, flow_def: None }],
        };
        let dot = dump_dot(&graph);
        assert!(dot.contains("n1 -> n2;\n"));
    }
}
