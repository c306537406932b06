use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;
use serde::Serialize;
use tracing::debug;

use super::builder::DocumentGraph;

/// A community returned by modularity-maximizing partitioning.
#[derive(Debug, Clone, Serialize)]
pub struct CommunityInfo {
    pub community_id: usize,
    /// Document ids in this community, sorted.
    pub nodes: Vec<String>,
    pub size: usize,
    /// Internal edge density: `internal_edges / C(size, 2)`.
    pub density: f64,
    /// Mean PageRank of the member nodes.
    pub avg_centrality: f64,
}

/// A hub document ranked by combined centrality.
#[derive(Debug, Clone, Serialize)]
pub struct HubDocument {
    pub doc_id: String,
    pub title: String,
    pub degree: usize,
    pub pagerank: f64,
    pub betweenness: f64,
    pub community: Option<usize>,
}

/// A path between two documents.
#[derive(Debug, Clone, Serialize)]
pub struct PathInfo {
    pub source_id: String,
    pub target_id: String,
    pub path: Vec<String>,
    /// Number of edges.
    pub length: usize,
    /// Sum of edge weights along the path.
    pub total_weight: f64,
}

/// Whole-graph statistics.
#[derive(Debug, Clone, Serialize)]
pub struct GraphStatistics {
    pub nodes: usize,
    pub edges: usize,
    pub density: f64,
    pub is_connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_components: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub largest_component_size: Option<usize>,
    pub avg_clustering: f64,
    pub avg_degree: f64,
}

/// Analyzer for document knowledge graphs.
///
/// Owns the graph while analyzing; community labels and centrality
/// scores are written back onto the nodes. Partition, PageRank and
/// betweenness results are cached after the first computation.
pub struct GraphAnalyzer {
    graph: DocumentGraph,
    pg: UnGraph<String, f64>,
    indices: HashMap<String, NodeIndex>,
    communities: Option<Vec<CommunityInfo>>,
    pagerank: Option<HashMap<String, f64>>,
    betweenness: Option<HashMap<String, f64>>,
}

impl GraphAnalyzer {
    pub fn new(graph: DocumentGraph) -> Self {
        let (pg, indices) = graph.to_petgraph();
        Self {
            graph,
            pg,
            indices,
            communities: None,
            pagerank: None,
            betweenness: None,
        }
    }

    /// The analyzed graph, with whatever annotations have been written.
    pub fn graph(&self) -> &DocumentGraph {
        &self.graph
    }

    /// Consume the analyzer and return the annotated graph.
    pub fn into_graph(self) -> DocumentGraph {
        self.graph
    }

    /// Detect communities via modularity optimization (Louvain local
    /// moving + aggregation). Higher `resolution` yields more, smaller
    /// communities. Results are cached and labels written onto nodes,
    /// sorted by community size descending.
    pub fn detect_communities(&mut self, resolution: f64) -> Vec<CommunityInfo> {
        if let Some(cached) = &self.communities {
            return cached.clone();
        }

        let ids = self.sorted_node_ids();
        let id_pos: HashMap<&str, usize> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();
        let edges: Vec<(usize, usize, f64)> = self
            .graph
            .edges
            .iter()
            .filter_map(|e| {
                let a = *id_pos.get(e.source_id.as_str())?;
                let b = *id_pos.get(e.target_id.as_str())?;
                Some((a, b, e.weight))
            })
            .collect();

        let assignment = louvain_partition(ids.len(), &edges, resolution);

        let mut by_community: HashMap<usize, Vec<String>> = HashMap::new();
        for (pos, id) in ids.iter().enumerate() {
            by_community
                .entry(assignment[pos])
                .or_default()
                .push(id.clone());
        }

        let pagerank = self.calculate_pagerank(0.85);

        let mut infos: Vec<CommunityInfo> = by_community
            .into_values()
            .map(|mut nodes| {
                nodes.sort();
                let size = nodes.len();
                let node_set: HashSet<&str> = nodes.iter().map(String::as_str).collect();
                let internal = self
                    .graph
                    .edges
                    .iter()
                    .filter(|e| {
                        node_set.contains(e.source_id.as_str())
                            && node_set.contains(e.target_id.as_str())
                    })
                    .count();
                let possible = size * size.saturating_sub(1) / 2;
                let density = if possible > 0 {
                    internal as f64 / possible as f64
                } else {
                    0.0
                };
                let avg_centrality = nodes
                    .iter()
                    .map(|n| pagerank.get(n).copied().unwrap_or(0.0))
                    .sum::<f64>()
                    / size.max(1) as f64;
                CommunityInfo {
                    community_id: 0,
                    nodes,
                    size,
                    density,
                    avg_centrality,
                }
            })
            .collect();

        // Largest community first; ties broken by first member for
        // deterministic labeling.
        infos.sort_by(|a, b| b.size.cmp(&a.size).then(a.nodes.cmp(&b.nodes)));
        for (label, info) in infos.iter_mut().enumerate() {
            info.community_id = label;
            for node_id in &info.nodes {
                if let Some(node) = self.graph.nodes.get_mut(node_id) {
                    node.community = Some(label);
                }
            }
        }

        debug!(communities = infos.len(), "community detection complete");
        self.communities = Some(infos.clone());
        infos
    }

    /// PageRank with the given damping factor. Scores sum to 1 and are
    /// written to each node's `centrality`. Cached.
    pub fn calculate_pagerank(&mut self, alpha: f64) -> HashMap<String, f64> {
        if let Some(cached) = &self.pagerank {
            return cached.clone();
        }

        let n = self.pg.node_count();
        let mut scores: HashMap<String, f64> = HashMap::new();
        if n == 0 {
            self.pagerank = Some(scores.clone());
            return scores;
        }

        // Weighted degree per node; zero-strength nodes dangle.
        let mut weight_sum = vec![0.0f64; n];
        for edge in self.pg.edge_references() {
            weight_sum[edge.source().index()] += *edge.weight();
            weight_sum[edge.target().index()] += *edge.weight();
        }

        let uniform = 1.0 / n as f64;
        let mut x = vec![uniform; n];
        for _ in 0..100 {
            let dangling: f64 = (0..n)
                .filter(|&i| weight_sum[i] == 0.0)
                .map(|i| x[i])
                .sum();

            let mut next = vec![(1.0 - alpha) * uniform + alpha * dangling * uniform; n];
            for edge in self.pg.edge_references() {
                let (a, b) = (edge.source().index(), edge.target().index());
                let w = *edge.weight();
                if weight_sum[a] > 0.0 {
                    next[b] += alpha * x[a] * w / weight_sum[a];
                }
                if weight_sum[b] > 0.0 {
                    next[a] += alpha * x[b] * w / weight_sum[b];
                }
            }

            let diff: f64 = x.iter().zip(&next).map(|(a, b)| (a - b).abs()).sum();
            x = next;
            if diff < 1e-10 {
                break;
            }
        }

        let total: f64 = x.iter().sum();
        for idx in self.pg.node_indices() {
            let id = self.pg[idx].clone();
            let score = if total > 0.0 {
                x[idx.index()] / total
            } else {
                uniform
            };
            if let Some(node) = self.graph.nodes.get_mut(&id) {
                node.centrality = score;
            }
            scores.insert(id, score);
        }

        self.pagerank = Some(scores.clone());
        scores
    }

    /// Normalized degree centrality; raw degrees are written to nodes.
    pub fn calculate_degree_centrality(&mut self) -> HashMap<String, f64> {
        let n = self.pg.node_count();
        let mut result = HashMap::new();
        for idx in self.pg.node_indices() {
            let id = self.pg[idx].clone();
            let degree = self.pg.edges(idx).count();
            if let Some(node) = self.graph.nodes.get_mut(&id) {
                node.degree = degree;
            }
            let centrality = if n > 1 {
                degree as f64 / (n - 1) as f64
            } else {
                0.0
            };
            result.insert(id, centrality);
        }
        result
    }

    /// Normalized betweenness centrality (Brandes, unweighted). Cached.
    pub fn calculate_betweenness_centrality(&mut self) -> HashMap<String, f64> {
        if let Some(cached) = &self.betweenness {
            return cached.clone();
        }

        let n = self.pg.node_count();
        let mut delta_sum = vec![0.0f64; n];

        for s in self.pg.node_indices() {
            // BFS from s.
            let mut stack: Vec<NodeIndex> = Vec::new();
            let mut preds: Vec<Vec<NodeIndex>> = vec![Vec::new(); n];
            let mut sigma = vec![0.0f64; n];
            let mut dist = vec![-1i64; n];
            sigma[s.index()] = 1.0;
            dist[s.index()] = 0;

            let mut queue = VecDeque::new();
            queue.push_back(s);
            while let Some(v) = queue.pop_front() {
                stack.push(v);
                for w in self.pg.neighbors(v) {
                    if dist[w.index()] < 0 {
                        dist[w.index()] = dist[v.index()] + 1;
                        queue.push_back(w);
                    }
                    if dist[w.index()] == dist[v.index()] + 1 {
                        sigma[w.index()] += sigma[v.index()];
                        preds[w.index()].push(v);
                    }
                }
            }

            let mut delta = vec![0.0f64; n];
            while let Some(w) = stack.pop() {
                for &v in &preds[w.index()] {
                    delta[v.index()] +=
                        sigma[v.index()] / sigma[w.index()] * (1.0 + delta[w.index()]);
                }
                if w != s {
                    delta_sum[w.index()] += delta[w.index()];
                }
            }
        }

        let scale = if n > 2 {
            1.0 / ((n - 1) as f64 * (n - 2) as f64)
        } else {
            0.0
        };

        let mut result = HashMap::new();
        for idx in self.pg.node_indices() {
            result.insert(self.pg[idx].clone(), delta_sum[idx.index()] * scale);
        }

        self.betweenness = Some(result.clone());
        result
    }

    /// Top-N hub documents by
    /// `0.5·pagerank + 0.3·betweenness + 0.2·(degree/|V|)`.
    pub fn identify_hubs(&mut self, top_n: usize) -> Vec<HubDocument> {
        let pagerank = self.calculate_pagerank(0.85);
        self.calculate_degree_centrality();
        let betweenness = self.calculate_betweenness_centrality();
        if self.communities.is_none() {
            self.detect_communities(1.0);
        }

        let total_nodes = self.graph.total_nodes().max(1);
        let mut hubs: Vec<HubDocument> = self
            .graph
            .nodes
            .values()
            .map(|node| HubDocument {
                doc_id: node.doc_id.clone(),
                title: node.title.clone(),
                degree: node.degree,
                pagerank: pagerank.get(&node.doc_id).copied().unwrap_or(0.0),
                betweenness: betweenness.get(&node.doc_id).copied().unwrap_or(0.0),
                community: node.community,
            })
            .collect();

        let score = |h: &HubDocument| {
            0.5 * h.pagerank + 0.3 * h.betweenness + 0.2 * (h.degree as f64 / total_nodes as f64)
        };
        hubs.sort_by(|a, b| {
            score(b)
                .partial_cmp(&score(a))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.doc_id.cmp(&b.doc_id))
        });
        hubs.truncate(top_n);
        hubs
    }

    /// Weighted shortest path (edge weight as cost), or `None` when the
    /// endpoints are missing or disconnected.
    pub fn find_shortest_path(&self, source_id: &str, target_id: &str) -> Option<PathInfo> {
        let &source = self.indices.get(source_id)?;
        let &target = self.indices.get(target_id)?;

        let (cost, path) = petgraph::algo::astar(
            &self.pg,
            source,
            |node| node == target,
            |edge| *edge.weight(),
            |_| 0.0,
        )?;

        Some(PathInfo {
            source_id: source_id.to_string(),
            target_id: target_id.to_string(),
            length: path.len().saturating_sub(1),
            total_weight: cost,
            path: path.into_iter().map(|idx| self.pg[idx].clone()).collect(),
        })
    }

    /// All simple paths up to `max_length` edges, sorted by
    /// `(length asc, weight desc)`.
    pub fn find_all_paths(
        &self,
        source_id: &str,
        target_id: &str,
        max_length: usize,
    ) -> Vec<PathInfo> {
        let (Some(&source), Some(&target)) =
            (self.indices.get(source_id), self.indices.get(target_id))
        else {
            return Vec::new();
        };
        if max_length == 0 {
            return Vec::new();
        }

        let paths: Vec<Vec<NodeIndex>> = petgraph::algo::all_simple_paths(
            &self.pg,
            source,
            target,
            0,
            Some(max_length.saturating_sub(1)),
        )
        .collect();

        let mut infos: Vec<PathInfo> = paths
            .into_iter()
            .map(|path| {
                let total_weight: f64 = path
                    .windows(2)
                    .filter_map(|pair| {
                        self.pg
                            .find_edge(pair[0], pair[1])
                            .and_then(|e| self.pg.edge_weight(e))
                            .copied()
                    })
                    .sum();
                PathInfo {
                    source_id: source_id.to_string(),
                    target_id: target_id.to_string(),
                    length: path.len().saturating_sub(1),
                    total_weight,
                    path: path.into_iter().map(|idx| self.pg[idx].clone()).collect(),
                }
            })
            .collect();

        infos.sort_by(|a, b| {
            a.length.cmp(&b.length).then(
                b.total_weight
                    .partial_cmp(&a.total_weight)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
        });
        infos
    }

    /// Neighbors grouped by hop distance (1..=max_distance), excluding
    /// the seed. Each level is sorted.
    pub fn get_neighbors(
        &self,
        node_id: &str,
        max_distance: usize,
    ) -> HashMap<usize, Vec<String>> {
        let Some(&start) = self.indices.get(node_id) else {
            return HashMap::new();
        };

        let mut result: HashMap<usize, Vec<String>> = HashMap::new();
        let mut visited: HashSet<NodeIndex> = HashSet::from([start]);
        let mut frontier = vec![start];

        for distance in 1..=max_distance {
            let mut next = Vec::new();
            for &node in &frontier {
                for neighbor in self.pg.neighbors(node) {
                    if visited.insert(neighbor) {
                        next.push(neighbor);
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            let mut ids: Vec<String> = next.iter().map(|&idx| self.pg[idx].clone()).collect();
            ids.sort();
            result.insert(distance, ids);
            frontier = next;
        }

        result
    }

    /// Local clustering coefficient per node.
    pub fn calculate_clustering_coefficients(&self) -> HashMap<String, f64> {
        let mut result = HashMap::new();
        for idx in self.pg.node_indices() {
            let neighbors: HashSet<NodeIndex> = self.pg.neighbors(idx).collect();
            let degree = neighbors.len();
            let coefficient = if degree < 2 {
                0.0
            } else {
                let mut links = 0usize;
                for &a in &neighbors {
                    for b in self.pg.neighbors(a) {
                        if b.index() > a.index() && neighbors.contains(&b) {
                            links += 1;
                        }
                    }
                }
                2.0 * links as f64 / (degree as f64 * (degree - 1) as f64)
            };
            result.insert(self.pg[idx].clone(), coefficient);
        }
        result
    }

    /// Overall graph statistics.
    pub fn get_statistics(&self) -> GraphStatistics {
        let n = self.pg.node_count();
        let e = self.pg.edge_count();

        let density = if n > 1 {
            2.0 * e as f64 / (n as f64 * (n - 1) as f64)
        } else {
            0.0
        };

        let components = self.connected_components();
        let is_connected = components.len() == 1 && n > 0;
        let (num_components, largest_component_size) = if is_connected {
            (None, None)
        } else {
            (
                Some(components.len()),
                components.iter().map(Vec::len).max(),
            )
        };

        let clustering = self.calculate_clustering_coefficients();
        let avg_clustering = if clustering.is_empty() {
            0.0
        } else {
            clustering.values().sum::<f64>() / clustering.len() as f64
        };

        let avg_degree = if n > 0 { 2.0 * e as f64 / n as f64 } else { 0.0 };

        GraphStatistics {
            nodes: n,
            edges: e,
            density,
            is_connected,
            num_components,
            largest_component_size,
            avg_clustering,
            avg_degree,
        }
    }

    fn connected_components(&self) -> Vec<Vec<NodeIndex>> {
        let mut components = Vec::new();
        let mut visited: HashSet<NodeIndex> = HashSet::new();
        for start in self.pg.node_indices() {
            if visited.contains(&start) {
                continue;
            }
            let mut component = Vec::new();
            let mut queue = VecDeque::from([start]);
            visited.insert(start);
            while let Some(node) = queue.pop_front() {
                component.push(node);
                for neighbor in self.pg.neighbors(node) {
                    if visited.insert(neighbor) {
                        queue.push_back(neighbor);
                    }
                }
            }
            components.push(component);
        }
        components
    }

    fn sorted_node_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.graph.nodes.keys().cloned().collect();
        ids.sort();
        ids
    }
}

/// Louvain-style modularity optimization: repeated local moving passes
/// with graph aggregation between levels. Returns a community label per
/// node position. A graph without edges partitions into singletons.
fn louvain_partition(n: usize, edges: &[(usize, usize, f64)], resolution: f64) -> Vec<usize> {
    let mut assignment: Vec<usize> = (0..n).collect();
    let mut level_edges: Vec<(usize, usize, f64)> = edges.to_vec();
    let mut level_n = n;

    for _ in 0..10 {
        let (labels, improved) = local_moving(level_n, &level_edges, resolution);

        // Renumber labels compactly, in node order for determinism.
        let mut remap: HashMap<usize, usize> = HashMap::new();
        let mut compact = vec![0usize; level_n];
        for (node, &label) in labels.iter().enumerate() {
            let next = remap.len();
            let id = *remap.entry(label).or_insert(next);
            compact[node] = id;
        }
        let communities = remap.len();

        for slot in assignment.iter_mut() {
            *slot = compact[*slot];
        }

        if !improved || communities == level_n {
            break;
        }

        // Aggregate: communities become nodes, weights merged.
        let mut merged: HashMap<(usize, usize), f64> = HashMap::new();
        for &(a, b, w) in &level_edges {
            let (ca, cb) = (compact[a], compact[b]);
            let key = if ca <= cb { (ca, cb) } else { (cb, ca) };
            *merged.entry(key).or_insert(0.0) += w;
        }
        level_edges = merged.into_iter().map(|((a, b), w)| (a, b, w)).collect();
        level_edges.sort_by(|x, y| (x.0, x.1).cmp(&(y.0, y.1)));
        level_n = communities;
    }

    assignment
}

/// One Louvain level: move nodes between communities until no single
/// move improves modularity.
fn local_moving(n: usize, edges: &[(usize, usize, f64)], resolution: f64) -> (Vec<usize>, bool) {
    let mut community: Vec<usize> = (0..n).collect();
    if n == 0 {
        return (community, false);
    }

    // Weighted degrees; self-loops count twice.
    let mut k = vec![0.0f64; n];
    let mut adjacency: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n];
    let mut m2 = 0.0f64;
    for &(a, b, w) in edges {
        if a == b {
            k[a] += 2.0 * w;
        } else {
            k[a] += w;
            k[b] += w;
            adjacency[a].push((b, w));
            adjacency[b].push((a, w));
        }
        m2 += 2.0 * w;
    }

    if m2 == 0.0 {
        return (community, false);
    }

    let mut tot: Vec<f64> = k.clone();
    let mut improved_any = false;

    for _ in 0..100 {
        let mut moved = false;
        for node in 0..n {
            let current = community[node];

            // Weight from `node` to each neighboring community.
            let mut weights: HashMap<usize, f64> = HashMap::new();
            for &(neighbor, w) in &adjacency[node] {
                *weights.entry(community[neighbor]).or_insert(0.0) += w;
            }

            tot[current] -= k[node];

            let gain = |c: usize| {
                let w_c = weights.get(&c).copied().unwrap_or(0.0);
                w_c - resolution * k[node] * tot[c] / m2
            };

            let mut best = current;
            let mut best_gain = gain(current);
            let mut candidates: Vec<usize> = weights.keys().copied().collect();
            candidates.sort_unstable();
            for c in candidates {
                let g = gain(c);
                if g > best_gain + 1e-12 {
                    best = c;
                    best_gain = g;
                }
            }

            tot[best] += k[node];
            if best != current {
                community[node] = best;
                moved = true;
                improved_any = true;
            }
        }
        if !moved {
            break;
        }
    }

    (community, improved_any)
}
