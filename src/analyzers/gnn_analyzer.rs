use std::sync::Mutex;
use std::collections::HashMap;

use crate::core::Analyzer;
use crate::features::FeatureGraphBuilder;
use crate::gnn::{GraphBatch, GraphClassifier};
use crate::models::*;
use crate::utils::{Result, DetectorError};

/// Runs a trained [`GraphClassifier`] on the contract's call graph.
pub struct GnnAnalyzer {
    model: Mutex<GraphClassifier>,
    builder: FeatureGraphBuilder,
}

impl GnnAnalyzer {
    /// Takes ownership of a trained model and switches it to eval mode.
    pub fn new(mut model: GraphClassifier) -> Self {
        model.eval();
        tracing::info!("GNN analyzer ready ({} model)", model.model_name());
        Self {
            model: Mutex::new(model),
            builder: FeatureGraphBuilder::new(),
        }
    }

    pub fn predict(&self, target: &ContractTarget) -> Result<GnnPrediction> {
        let graph = self.builder.build(&target.contract, &target.facts);
        let batch = GraphBatch::from_graph(&graph)?;

        let mut model = self.model.lock()
            .map_err(|_| DetectorError::MLError("GNN model lock poisoned".into()))?;
        let out = model.forward(&batch)?;

        let safe_score = out[[0, 0]];
        let ponzi_score = out[[0, 1]];
        let risk_score = (ponzi_score * 100.0).clamp(0.0, 100.0) as u8;

        Ok(GnnPrediction {
            is_ponzi: ponzi_score > safe_score,
            risk_score,
            ponzi_score,
            safe_score,
            model_name: model.model_name(),
        })
    }
}

impl Analyzer for GnnAnalyzer {
    fn name(&self) -> &'static str {
        "gnn-call-graph"
    }

    fn analyze(&self, target: &ContractTarget) -> Result<AnalysisResult> {
        tracing::info!(
            "Running GNN analysis on {} ({} call graph nodes)",
            target.contract.name,
            target.facts.node_count()
        );

        let prediction = self.predict(target)?;

        tracing::info!("GNN prediction: {} ({}%)",
            if prediction.is_ponzi { "PONZI" } else { "SAFE" },
            prediction.risk_score
        );

        let mut metadata = HashMap::new();
        metadata.insert("gnn_model".to_string(), serde_json::json!(prediction.model_name));
        metadata.insert("gnn_ponzi_score".to_string(), serde_json::json!(prediction.ponzi_score));
        metadata.insert("gnn_safe_score".to_string(), serde_json::json!(prediction.safe_score));

        Ok(AnalysisResult {
            risk_score: prediction.risk_score,
            findings: prediction.to_findings(),
            metadata,
        })
    }

    /// Nothing to classify without functions
    fn can_analyze(&self, target: &ContractTarget) -> bool {
        target.facts.node_count() > 0
    }

    fn weight(&self) -> f64 {
        0.60
    }
}

#[derive(Debug)]
pub struct GnnPrediction {
    pub is_ponzi: bool,
    pub risk_score: u8,
    /// Sigmoid output of the Ponzi channel
    pub ponzi_score: f32,
    /// Sigmoid output of the non-Ponzi channel; need not sum to 1 with `ponzi_score`
    pub safe_score: f32,
    pub model_name: &'static str,
}

impl GnnPrediction {
    pub fn to_findings(&self) -> Vec<Finding> {
        vec![Finding {
            severity: Severity::from_score(self.risk_score),
            category: Category::GraphModel,
            message: format!(
                "{} model: {} (ponzi {:.3}, safe {:.3})",
                self.model_name,
                if self.is_ponzi { "Ponzi-like call graph" } else { "no Ponzi pattern" },
                self.ponzi_score,
                self.safe_score
            ),
            evidence: Some(serde_json::json!({
                "risk_score": self.risk_score,
                "ponzi_score": self.ponzi_score,
            })),
        }]
    }
}
