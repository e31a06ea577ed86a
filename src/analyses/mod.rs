//! Alias analyses and the memory-state encoding pipeline.

mod encoder;
mod mod_ref;
mod points_to_graph;
mod steensgaard;

pub use self::{
    encoder::MemoryStateEncoder,
    mod_ref::{AgnosticModRefSummarizer, ModRefSummary},
    points_to_graph::{MemoryNodeId, MemoryNodeKind, PointsToGraph, RegisterTargets},
    steensgaard::Steensgaard,
};
