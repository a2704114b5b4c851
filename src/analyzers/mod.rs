pub mod fact_analyzer;
pub mod gnn_analyzer;

pub use fact_analyzer::FactAnalyzer;
pub use gnn_analyzer::{GnnAnalyzer, GnnPrediction};
