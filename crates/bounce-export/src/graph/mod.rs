//! Export graph: node storage and the builder that assembles it.

mod arena;
mod builder;
mod levels;

pub use arena::{NodeArena, NodeId, Outlet};
pub use builder::{ExportAnalysis, GraphBuilder, GraphStats};
