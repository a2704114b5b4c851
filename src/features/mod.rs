pub mod extractor;
pub mod graph;

pub use extractor::{CallGraph, CallNode, ContractFacts, Declaration, FunctionRef, SendFunction};
pub use graph::{FeatureGraphBuilder, EDGE_FEATURE_SIZE, NODE_FEATURE_SIZE};
