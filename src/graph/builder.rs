use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use petgraph::graph::{NodeIndex, UnGraph};
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::config::Config;
use crate::document::{Document, RelationKind};

/// A document node in the knowledge graph.
#[derive(Debug, Clone, Serialize)]
pub struct GraphNode {
    pub doc_id: String,
    pub title: String,
    pub file_path: String,
    pub tags: Vec<String>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// Number of incident edges after pruning.
    pub degree: usize,
    /// PageRank score once the analyzer has run.
    pub centrality: f64,
    /// Community label once detection has run.
    pub community: Option<usize>,
}

/// Dominant signal behind an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    Wikilink,
    Similarity,
    Keyword,
    Computed,
}

/// An undirected weighted edge between two documents.
///
/// `weight = 0.2·wikilink + 0.5·vector + 0.3·keyword`, all in [0, 1].
#[derive(Debug, Clone, Serialize)]
pub struct GraphEdge {
    pub source_id: String,
    pub target_id: String,
    pub weight: f64,
    pub wikilink_score: f64,
    pub vector_score: f64,
    pub keyword_score: f64,
    pub relationship_type: EdgeKind,
}

impl GraphEdge {
    /// Recompute the combined weight from the component scores.
    pub fn calculate_weight(&mut self) {
        self.weight =
            self.wikilink_score * 0.2 + self.vector_score * 0.5 + self.keyword_score * 0.3;
    }
}

/// The complete document knowledge graph: nodes keyed by id, edges in a
/// flat list. No pointer cycles; edges reference nodes by id only.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DocumentGraph {
    pub nodes: HashMap<String, GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl DocumentGraph {
    pub fn total_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn total_edges(&self) -> usize {
        self.edges.len()
    }

    pub fn get_node(&self, doc_id: &str) -> Option<&GraphNode> {
        self.nodes.get(doc_id)
    }

    pub fn add_node(&mut self, node: GraphNode) {
        self.nodes.insert(node.doc_id.clone(), node);
    }

    /// Add an edge and bump both endpoint degrees.
    pub fn add_edge(&mut self, edge: GraphEdge) {
        if let Some(node) = self.nodes.get_mut(&edge.source_id) {
            node.degree += 1;
        }
        if let Some(node) = self.nodes.get_mut(&edge.target_id) {
            node.degree += 1;
        }
        self.edges.push(edge);
    }

    /// All edges incident to a node.
    pub fn edges_for_node(&self, doc_id: &str) -> Vec<&GraphEdge> {
        self.edges
            .iter()
            .filter(|e| e.source_id == doc_id || e.target_id == doc_id)
            .collect()
    }

    /// Convert to a petgraph graph for the analysis algorithms.
    /// Node insertion is sorted by id so indices are deterministic.
    pub fn to_petgraph(&self) -> (UnGraph<String, f64>, HashMap<String, NodeIndex>) {
        let mut graph = UnGraph::new_undirected();
        let mut indices = HashMap::new();

        let mut ids: Vec<&String> = self.nodes.keys().collect();
        ids.sort();
        for id in ids {
            let idx = graph.add_node(id.clone());
            indices.insert(id.clone(), idx);
        }

        for edge in &self.edges {
            if let (Some(&a), Some(&b)) = (
                indices.get(&edge.source_id),
                indices.get(&edge.target_id),
            ) {
                graph.add_edge(a, b, edge.weight);
            }
        }

        (graph, indices)
    }

    /// Zero all degrees and recount from the edge list.
    pub fn recompute_degrees(&mut self) {
        for node in self.nodes.values_mut() {
            node.degree = 0;
        }
        let pairs: Vec<(String, String)> = self
            .edges
            .iter()
            .map(|e| (e.source_id.clone(), e.target_id.clone()))
            .collect();
        for (source, target) in pairs {
            if let Some(node) = self.nodes.get_mut(&source) {
                node.degree += 1;
            }
            if let Some(node) = self.nodes.get_mut(&target) {
                node.degree += 1;
            }
        }
    }
}

static WORD_RE: OnceLock<Regex> = OnceLock::new();

fn word_re() -> &'static Regex {
    WORD_RE.get_or_init(|| Regex::new(r"\w+").unwrap())
}

/// Builds the weighted document graph from three signals: explicit
/// wikilinks, embedding similarity, and keyword overlap.
#[derive(Debug, Clone)]
pub struct GraphBuilder {
    min_edge_weight: f64,
    max_edges_per_node: usize,
    keyword_min_length: usize,
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self {
            min_edge_weight: 0.1,
            max_edges_per_node: 20,
            keyword_min_length: 3,
        }
    }
}

impl GraphBuilder {
    pub fn new(min_edge_weight: f64, max_edges_per_node: usize, keyword_min_length: usize) -> Self {
        Self {
            min_edge_weight,
            max_edges_per_node,
            keyword_min_length,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.min_edge_weight,
            config.max_edges_per_node,
            config.keyword_min_length,
        )
    }

    /// Build the graph. `embeddings` maps doc ids to one representative
    /// vector per document; missing entries score 0 on the vector signal.
    pub fn build_graph(
        &self,
        documents: &[&Document],
        embeddings: Option<&HashMap<String, Vec<f32>>>,
    ) -> DocumentGraph {
        let mut graph = DocumentGraph::default();

        for doc in documents {
            let mut metadata = serde_json::Map::new();
            metadata.insert(
                "word_count".into(),
                serde_json::Value::from(doc.metadata.word_count),
            );
            metadata.insert(
                "chunk_count".into(),
                serde_json::Value::from(doc.chunks.len()),
            );
            graph.add_node(GraphNode {
                doc_id: doc.doc_id.clone(),
                title: doc.title(),
                file_path: doc.file_path.to_string_lossy().into_owned(),
                tags: doc.metadata.tags.clone(),
                metadata,
                degree: 0,
                centrality: 0.0,
                community: None,
            });
        }

        for (i, doc1) in documents.iter().enumerate() {
            for doc2 in &documents[i + 1..] {
                if let Some(edge) = self.build_edge(doc1, doc2, embeddings) {
                    if edge.weight >= self.min_edge_weight {
                        graph.add_edge(edge);
                    }
                }
            }
        }

        self.prune_edges(&mut graph);

        debug!(
            nodes = graph.total_nodes(),
            edges = graph.total_edges(),
            "graph built"
        );
        graph
    }

    fn build_edge(
        &self,
        doc1: &Document,
        doc2: &Document,
        embeddings: Option<&HashMap<String, Vec<f32>>>,
    ) -> Option<GraphEdge> {
        let mut edge = GraphEdge {
            source_id: doc1.doc_id.clone(),
            target_id: doc2.doc_id.clone(),
            weight: 0.0,
            wikilink_score: wikilink_score(doc1, doc2),
            vector_score: embeddings
                .map(|map| vector_score(&doc1.doc_id, &doc2.doc_id, map))
                .unwrap_or(0.0),
            keyword_score: self.keyword_score(doc1, doc2),
            relationship_type: EdgeKind::Computed,
        };
        edge.calculate_weight();

        edge.relationship_type = if edge.wikilink_score > 0.0 {
            EdgeKind::Wikilink
        } else if edge.vector_score > edge.keyword_score {
            EdgeKind::Similarity
        } else if edge.keyword_score > 0.0 {
            EdgeKind::Keyword
        } else {
            EdgeKind::Computed
        };

        (edge.weight > 0.0).then_some(edge)
    }

    /// Jaccard similarity of the two documents' keyword sets.
    fn keyword_score(&self, doc1: &Document, doc2: &Document) -> f64 {
        let k1 = self.extract_keywords(doc1);
        let k2 = self.extract_keywords(doc2);
        if k1.is_empty() || k2.is_empty() {
            return 0.0;
        }
        let intersection = k1.intersection(&k2).count();
        let union = k1.union(&k2).count();
        if union == 0 {
            0.0
        } else {
            intersection as f64 / union as f64
        }
    }

    /// Keywords: lowercase tag path components plus lowercase title words,
    /// each at least `keyword_min_length` characters.
    fn extract_keywords(&self, doc: &Document) -> HashSet<String> {
        let mut keywords = HashSet::new();

        for tag in &doc.metadata.tags {
            for part in tag.split('/') {
                if part.chars().count() >= self.keyword_min_length {
                    keywords.insert(part.to_lowercase());
                }
            }
        }

        let title = doc.title().to_lowercase();
        for word in word_re().find_iter(&title) {
            if word.as_str().chars().count() >= self.keyword_min_length {
                keywords.insert(word.as_str().to_string());
            }
        }

        keywords
    }

    /// Voting prune: each node votes for its top `max_edges_per_node`
    /// incident edges by weight; any edge with at least one vote
    /// survives. Degrees are recomputed afterwards.
    fn prune_edges(&self, graph: &mut DocumentGraph) {
        if self.max_edges_per_node == 0 {
            return;
        }

        let mut node_edges: HashMap<&str, Vec<(usize, f64)>> = HashMap::new();
        for (idx, edge) in graph.edges.iter().enumerate() {
            node_edges
                .entry(edge.source_id.as_str())
                .or_default()
                .push((idx, edge.weight));
            node_edges
                .entry(edge.target_id.as_str())
                .or_default()
                .push((idx, edge.weight));
        }

        let mut voted: HashSet<usize> = HashSet::new();
        for edges in node_edges.values_mut() {
            edges.sort_by(|a, b| {
                b.1.partial_cmp(&a.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.0.cmp(&b.0))
            });
            for (idx, _) in edges.iter().take(self.max_edges_per_node) {
                voted.insert(*idx);
            }
        }

        let mut idx = 0;
        graph.edges.retain(|_| {
            let keep = voted.contains(&idx);
            idx += 1;
            keep
        });

        graph.recompute_degrees();
    }
}

/// 1.0 iff either document carries an outbound wikilink relationship
/// targeting the other.
fn wikilink_score(doc1: &Document, doc2: &Document) -> f64 {
    let is_link = |kind: RelationKind| {
        matches!(kind, RelationKind::Wikilink | RelationKind::WikilinkHeader)
    };
    let forward = doc1
        .relationships
        .iter()
        .any(|r| r.target_doc_id == doc2.doc_id && is_link(r.kind));
    let backward = doc2
        .relationships
        .iter()
        .any(|r| r.target_doc_id == doc1.doc_id && is_link(r.kind));
    if forward || backward {
        1.0
    } else {
        0.0
    }
}

/// Cosine similarity rescaled from [-1, 1] to [0, 1]; 0 when either
/// embedding is missing or has zero magnitude.
fn vector_score(doc1_id: &str, doc2_id: &str, embeddings: &HashMap<String, Vec<f32>>) -> f64 {
    let (Some(v1), Some(v2)) = (embeddings.get(doc1_id), embeddings.get(doc2_id)) else {
        return 0.0;
    };
    if v1.len() != v2.len() {
        return 0.0;
    }

    let dot: f64 = v1.iter().zip(v2).map(|(a, b)| (*a as f64) * (*b as f64)).sum();
    let m1: f64 = v1.iter().map(|a| (*a as f64).powi(2)).sum::<f64>().sqrt();
    let m2: f64 = v2.iter().map(|a| (*a as f64).powi(2)).sum::<f64>().sqrt();
    if m1 == 0.0 || m2 == 0.0 {
        return 0.0;
    }

    let similarity = dot / (m1 * m2);
    ((similarity + 1.0) / 2.0).clamp(0.0, 1.0)
}
