pub mod analyzer;
pub mod builder;
pub mod exporter;

pub use analyzer::{CommunityInfo, GraphAnalyzer, GraphStatistics, HubDocument, PathInfo};
pub use builder::{DocumentGraph, EdgeKind, GraphBuilder, GraphEdge, GraphNode};
pub use exporter::GraphExporter;
