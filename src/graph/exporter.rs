use std::collections::HashSet;

use serde::Serialize;

use super::analyzer::GraphAnalyzer;
use super::builder::DocumentGraph;
use crate::error::{Error, Result};

/// Node in the force-graph JSON view.
#[derive(Debug, Clone, Serialize)]
struct ForceNode {
    id: String,
    name: String,
    group: usize,
    degree: usize,
    centrality: f64,
}

/// Link in the force-graph JSON view.
#[derive(Debug, Clone, Serialize)]
struct ForceLink {
    source: String,
    target: String,
    value: f64,
}

#[derive(Debug, Clone, Serialize)]
struct ForceGraph {
    nodes: Vec<ForceNode>,
    links: Vec<ForceLink>,
}

/// Pure view transforms over a document graph: force-graph JSON,
/// Mermaid diagrams, a host-compatible view, GraphML, and sub-graph
/// helpers.
pub struct GraphExporter {
    analyzer: GraphAnalyzer,
}

impl GraphExporter {
    pub fn new(graph: DocumentGraph) -> Self {
        Self {
            analyzer: GraphAnalyzer::new(graph),
        }
    }

    fn graph(&self) -> &DocumentGraph {
        self.analyzer.graph()
    }

    /// Force-directed graph JSON. `max_nodes` keeps the top-centrality
    /// nodes and drops links touching removed nodes.
    pub fn to_force_graph_json(
        &mut self,
        min_edge_weight: f64,
        max_nodes: Option<usize>,
    ) -> Result<String> {
        self.analyzer.calculate_pagerank(0.85);

        let graph = self.analyzer.graph();
        let mut included: Vec<&str> = graph.nodes.keys().map(String::as_str).collect();
        if let Some(max) = max_nodes {
            if included.len() > max {
                included.sort_by(|a, b| {
                    let ca = graph.nodes[*a].centrality;
                    let cb = graph.nodes[*b].centrality;
                    cb.partial_cmp(&ca)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then(a.cmp(b))
                });
                included.truncate(max);
            }
        }
        let included: HashSet<&str> = included.into_iter().collect();

        let mut nodes: Vec<ForceNode> = graph
            .nodes
            .values()
            .filter(|n| included.contains(n.doc_id.as_str()))
            .map(|n| ForceNode {
                id: n.doc_id.clone(),
                name: n.title.clone(),
                group: n.community.unwrap_or(0),
                degree: n.degree,
                centrality: n.centrality,
            })
            .collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));

        let links: Vec<ForceLink> = graph
            .edges
            .iter()
            .filter(|e| {
                e.weight >= min_edge_weight
                    && included.contains(e.source_id.as_str())
                    && included.contains(e.target_id.as_str())
            })
            .map(|e| ForceLink {
                source: e.source_id.clone(),
                target: e.target_id.clone(),
                value: e.weight,
            })
            .collect();

        serde_json::to_string_pretty(&ForceGraph { nodes, links })
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Mermaid diagram. Edge style encodes weight: `==>` above 0.7,
    /// `-->` above 0.4, `-.->` otherwise. Undirected edges are
    /// deduplicated by sorted endpoint pair.
    pub fn to_mermaid(
        &self,
        direction: &str,
        max_nodes: Option<usize>,
        min_edge_weight: f64,
    ) -> String {
        let graph = self.graph();
        let mut lines = vec![format!("graph {direction}")];

        let mut included: Vec<&str> = graph.nodes.keys().map(String::as_str).collect();
        if let Some(max) = max_nodes {
            if included.len() > max {
                included.sort_by(|a, b| {
                    graph.nodes[*b]
                        .degree
                        .cmp(&graph.nodes[*a].degree)
                        .then(a.cmp(b))
                });
                included.truncate(max);
            }
        }
        included.sort();
        let included_set: HashSet<&str> = included.iter().copied().collect();

        for id in &included {
            let node = &graph.nodes[*id];
            let label: String = node
                .title
                .chars()
                .filter(|c| !matches!(c, '[' | ']' | '(' | ')'))
                .take(30)
                .collect();
            lines.push(format!("    {}[\"{}\"]", safe_id(id), label));
        }

        let mut seen: HashSet<(String, String)> = HashSet::new();
        for edge in &graph.edges {
            if edge.weight < min_edge_weight
                || !included_set.contains(edge.source_id.as_str())
                || !included_set.contains(edge.target_id.as_str())
            {
                continue;
            }
            let key = if edge.source_id <= edge.target_id {
                (edge.source_id.clone(), edge.target_id.clone())
            } else {
                (edge.target_id.clone(), edge.source_id.clone())
            };
            if !seen.insert(key) {
                continue;
            }

            let connector = if edge.weight > 0.7 {
                "==>"
            } else if edge.weight > 0.4 {
                "-->"
            } else {
                "-.->"
            };
            lines.push(format!(
                "    {} {} {}",
                safe_id(&edge.source_id),
                connector,
                safe_id(&edge.target_id)
            ));
        }

        lines.join("\n")
    }

    /// Host-compatible graph view, optionally centered on one node and
    /// expanded to `max_depth` hops.
    pub fn to_host_view(
        &self,
        center_node: Option<&str>,
        max_depth: usize,
    ) -> serde_json::Value {
        let graph = self.graph();

        let included: HashSet<String> = match center_node {
            Some(center) if graph.nodes.contains_key(center) => {
                let mut set: HashSet<String> = HashSet::from([center.to_string()]);
                for nodes in self.analyzer.get_neighbors(center, max_depth).into_values() {
                    set.extend(nodes);
                }
                set
            }
            _ => graph.nodes.keys().cloned().collect(),
        };

        let mut nodes: Vec<serde_json::Value> = graph
            .nodes
            .values()
            .filter(|n| included.contains(&n.doc_id))
            .map(|n| {
                serde_json::json!({
                    "id": n.doc_id,
                    "title": n.title,
                    "path": n.file_path,
                    "tags": n.tags,
                    "degree": n.degree,
                    "community": n.community,
                })
            })
            .collect();
        nodes.sort_by(|a, b| a["id"].as_str().cmp(&b["id"].as_str()));

        let edges: Vec<serde_json::Value> = graph
            .edges
            .iter()
            .filter(|e| included.contains(&e.source_id) && included.contains(&e.target_id))
            .map(|e| {
                serde_json::json!({
                    "source": e.source_id,
                    "target": e.target_id,
                    "weight": e.weight,
                    "type": e.relationship_type,
                })
            })
            .collect();

        let centered = center_node.filter(|c| graph.nodes.contains_key(*c));
        serde_json::json!({
            "nodes": nodes,
            "edges": edges,
            "center": centered,
            "depth": centered.map(|_| max_depth),
        })
    }

    /// GraphML export with `title`, `path`, `degree` node keys and
    /// `weight`, `type` edge keys.
    pub fn to_graphml(&self) -> String {
        let graph = self.graph();
        let mut lines = vec![
            r#"<?xml version="1.0" encoding="UTF-8"?>"#.to_string(),
            r#"<graphml xmlns="http://graphml.graphdrawing.org/xmlns">"#.to_string(),
            r#"  <key id="title" for="node" attr.name="title" attr.type="string"/>"#.to_string(),
            r#"  <key id="path" for="node" attr.name="path" attr.type="string"/>"#.to_string(),
            r#"  <key id="degree" for="node" attr.name="degree" attr.type="int"/>"#.to_string(),
            r#"  <key id="weight" for="edge" attr.name="weight" attr.type="double"/>"#.to_string(),
            r#"  <key id="type" for="edge" attr.name="type" attr.type="string"/>"#.to_string(),
            r#"  <graph id="G" edgedefault="undirected">"#.to_string(),
        ];

        let mut ids: Vec<&String> = graph.nodes.keys().collect();
        ids.sort();
        for id in ids {
            let node = &graph.nodes[id];
            lines.push(format!("    <node id=\"{}\">", escape_xml(id)));
            lines.push(format!(
                "      <data key=\"title\">{}</data>",
                escape_xml(&node.title)
            ));
            lines.push(format!(
                "      <data key=\"path\">{}</data>",
                escape_xml(&node.file_path)
            ));
            lines.push(format!("      <data key=\"degree\">{}</data>", node.degree));
            lines.push("    </node>".to_string());
        }

        for (i, edge) in graph.edges.iter().enumerate() {
            lines.push(format!(
                "    <edge id=\"e{i}\" source=\"{}\" target=\"{}\">",
                escape_xml(&edge.source_id),
                escape_xml(&edge.target_id)
            ));
            lines.push(format!(
                "      <data key=\"weight\">{:.4}</data>",
                edge.weight
            ));
            let kind = serde_json::to_value(edge.relationship_type)
                .ok()
                .and_then(|v| v.as_str().map(String::from))
                .unwrap_or_default();
            lines.push(format!("      <data key=\"type\">{kind}</data>"));
            lines.push("    </edge>".to_string());
        }

        lines.push("  </graph>".to_string());
        lines.push("</graphml>".to_string());
        lines.join("\n")
    }

    /// Sub-graph of nodes carrying any of the given tags, keeping only
    /// edges with both endpoints included.
    pub fn filter_by_tags(&self, tags: &[String]) -> DocumentGraph {
        let graph = self.graph();
        let mut filtered = DocumentGraph::default();

        for node in graph.nodes.values() {
            if node.tags.iter().any(|t| tags.contains(t)) {
                let mut node = node.clone();
                node.degree = 0;
                filtered.add_node(node);
            }
        }

        for edge in &graph.edges {
            if filtered.nodes.contains_key(&edge.source_id)
                && filtered.nodes.contains_key(&edge.target_id)
            {
                filtered.add_edge(edge.clone());
            }
        }

        filtered
    }

    /// Sub-graph expanded from a seed node out to `max_hops`.
    pub fn expand_from_node(&self, node_id: &str, max_hops: usize) -> DocumentGraph {
        let graph = self.graph();
        let mut expanded = DocumentGraph::default();
        if !graph.nodes.contains_key(node_id) {
            return expanded;
        }

        let mut included: HashSet<String> = HashSet::from([node_id.to_string()]);
        for nodes in self.analyzer.get_neighbors(node_id, max_hops).into_values() {
            included.extend(nodes);
        }

        for id in &included {
            if let Some(node) = graph.nodes.get(id) {
                let mut node = node.clone();
                node.degree = 0;
                expanded.add_node(node);
            }
        }
        for edge in &graph.edges {
            if included.contains(&edge.source_id) && included.contains(&edge.target_id) {
                expanded.add_edge(edge.clone());
            }
        }

        expanded
    }
}

/// Identifier safe for diagram DSLs: alphanumerics kept, the rest
/// becomes underscores.
fn safe_id(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::builder::{EdgeKind, GraphEdge, GraphNode};

    fn node(id: &str, title: &str, tags: &[&str]) -> GraphNode {
        GraphNode {
            doc_id: id.to_string(),
            title: title.to_string(),
            file_path: format!("/vault/{id}.md"),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            metadata: serde_json::Map::new(),
            degree: 0,
            centrality: 0.0,
            community: None,
        }
    }

    fn edge(a: &str, b: &str, weight: f64) -> GraphEdge {
        GraphEdge {
            source_id: a.to_string(),
            target_id: b.to_string(),
            weight,
            wikilink_score: 0.0,
            vector_score: 0.0,
            keyword_score: 0.0,
            relationship_type: EdgeKind::Similarity,
        }
    }

    fn sample_graph() -> DocumentGraph {
        let mut graph = DocumentGraph::default();
        graph.add_node(node("a", "Alpha Note", &["rust"]));
        graph.add_node(node("b", "Beta [draft] (wip)", &["rust", "tips"]));
        graph.add_node(node("c", "Gamma", &["cooking"]));
        graph.add_edge(edge("a", "b", 0.8));
        graph.add_edge(edge("b", "c", 0.5));
        graph.add_edge(edge("a", "c", 0.2));
        graph
    }

    #[test]
    fn force_graph_includes_all_nodes_and_links() {
        let mut exporter = GraphExporter::new(sample_graph());
        let json = exporter.to_force_graph_json(0.0, None).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["nodes"].as_array().unwrap().len(), 3);
        assert_eq!(value["links"].as_array().unwrap().len(), 3);
        assert!(value["nodes"][0]["centrality"].as_f64().unwrap() > 0.0);
    }

    #[test]
    fn force_graph_node_cap_drops_incident_links() {
        let mut exporter = GraphExporter::new(sample_graph());
        let json = exporter.to_force_graph_json(0.0, Some(2)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["nodes"].as_array().unwrap().len(), 2);
        for link in value["links"].as_array().unwrap() {
            let ids: Vec<&str> = value["nodes"]
                .as_array()
                .unwrap()
                .iter()
                .map(|n| n["id"].as_str().unwrap())
                .collect();
            assert!(ids.contains(&link["source"].as_str().unwrap()));
            assert!(ids.contains(&link["target"].as_str().unwrap()));
        }
    }

    #[test]
    fn force_graph_min_weight_filters_links() {
        let mut exporter = GraphExporter::new(sample_graph());
        let json = exporter.to_force_graph_json(0.4, None).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["links"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn mermaid_styles_by_weight() {
        let exporter = GraphExporter::new(sample_graph());
        let diagram = exporter.to_mermaid("TD", None, 0.0);
        assert!(diagram.starts_with("graph TD"));
        assert!(diagram.contains("a ==> b"));
        assert!(diagram.contains("b --> c"));
        assert!(diagram.contains("a -.-> c"));
    }

    #[test]
    fn mermaid_strips_brackets_from_labels() {
        let exporter = GraphExporter::new(sample_graph());
        let diagram = exporter.to_mermaid("LR", None, 0.0);
        assert!(diagram.contains("b[\"Beta draft wip\"]"));
    }

    #[test]
    fn mermaid_deduplicates_reverse_edges() {
        let mut graph = sample_graph();
        graph.add_edge(edge("b", "a", 0.8));
        let exporter = GraphExporter::new(graph);
        let diagram = exporter.to_mermaid("TD", None, 0.0);
        let count = diagram
            .lines()
            .filter(|l| l.contains("a ==> b") || l.contains("b ==> a"))
            .count();
        assert_eq!(count, 1);
    }

    #[test]
    fn host_view_full_graph() {
        let exporter = GraphExporter::new(sample_graph());
        let view = exporter.to_host_view(None, 2);
        assert_eq!(view["nodes"].as_array().unwrap().len(), 3);
        assert!(view["center"].is_null());
        assert!(view["depth"].is_null());
    }

    #[test]
    fn host_view_centered_expansion() {
        let mut graph = sample_graph();
        graph.add_node(node("far", "Far Away", &[]));
        let exporter = GraphExporter::new(graph);
        let view = exporter.to_host_view(Some("a"), 1);
        let ids: Vec<&str> = view["nodes"]
            .as_array()
            .unwrap()
            .iter()
            .map(|n| n["id"].as_str().unwrap())
            .collect();
        assert!(ids.contains(&"a"));
        assert!(!ids.contains(&"far"));
        assert_eq!(view["center"], "a");
        assert_eq!(view["depth"], 1);
    }

    #[test]
    fn graphml_escapes_and_structures() {
        let mut graph = DocumentGraph::default();
        graph.add_node(node("a", "Tom & Jerry <3", &[]));
        let exporter = GraphExporter::new(graph);
        let xml = exporter.to_graphml();
        assert!(xml.contains("Tom &amp; Jerry &lt;3"));
        assert!(xml.contains(r#"<graph id="G" edgedefault="undirected">"#));
        assert!(xml.ends_with("</graphml>"));
    }

    #[test]
    fn graphml_edge_attributes() {
        let exporter = GraphExporter::new(sample_graph());
        let xml = exporter.to_graphml();
        assert!(xml.contains(r#"<data key="weight">0.8000</data>"#));
        assert!(xml.contains(r#"<data key="type">similarity</data>"#));
    }

    #[test]
    fn filter_by_tags_keeps_matching_and_interior_edges() {
        let exporter = GraphExporter::new(sample_graph());
        let filtered = exporter.filter_by_tags(&["rust".to_string()]);
        assert_eq!(filtered.total_nodes(), 2);
        assert_eq!(filtered.total_edges(), 1);
        assert!(filtered.nodes.contains_key("a"));
        assert!(!filtered.nodes.contains_key("c"));
    }

    #[test]
    fn expand_from_node_bounded_by_hops() {
        let mut graph = DocumentGraph::default();
        for id in ["a", "b", "c", "d"] {
            graph.add_node(node(id, id, &[]));
        }
        graph.add_edge(edge("a", "b", 0.5));
        graph.add_edge(edge("b", "c", 0.5));
        graph.add_edge(edge("c", "d", 0.5));

        let exporter = GraphExporter::new(graph);
        let expanded = exporter.expand_from_node("a", 2);
        assert_eq!(expanded.total_nodes(), 3);
        assert!(!expanded.nodes.contains_key("d"));
        assert_eq!(expanded.total_edges(), 2);

        let missing = exporter.expand_from_node("ghost", 2);
        assert_eq!(missing.total_nodes(), 0);
    }

    #[test]
    fn safe_id_replaces_specials() {
        assert_eq!(safe_id("/vault/my-note.md"), "_vault_my_note_md");
    }
}
