//! Graph neural network for Ponzi classification
//!
//! Stacked message-passing layers over a contract graph, max-pooled into one
//! embedding per graph and mapped to two sigmoid outputs (not Ponzi / Ponzi).

pub mod batch;
pub mod config;
pub mod eval;
pub mod layer;
pub mod network;
pub mod nn;

pub use batch::{GraphBatch, GraphData};
pub use config::{GnnConfig, LayerKind};
pub use eval::{evaluate, Evaluation};
pub use layer::MessagePassingLayer;
pub use network::GraphClassifier;
