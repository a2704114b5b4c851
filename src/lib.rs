pub mod core;
pub mod models;
pub mod analyzers;
pub mod features;
pub mod gnn;
pub mod utils;

pub use crate::core::{Analyzer, PonziDetector};
pub use models::{Contract, ContractTarget, Verdict, Finding, Severity, Category};
pub use features::ContractFacts;
pub use gnn::{evaluate, GnnConfig, GraphBatch, GraphClassifier, GraphData, LayerKind};
pub use utils::{DetectorError, Result};
