//! infragraph discovers the managed resources of a cloud account, infers how
//! they are wired together (including references found in function code) and
//! renders the result as a node/edge graph.

pub mod cloud;
pub mod config;
pub mod graph;
pub mod resource;

pub use graph::{Discovery, Graph, GraphEdge, GraphNode};
