pub mod graph;
pub mod search;

pub use graph::{Graph, NodeId};
pub use search::{
    bfs_shortest_path, bidirectional_shortest_path, neighborhood, PathResult, Subgraph,
    SubgraphEdge, SubgraphNode,
};
