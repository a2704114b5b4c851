use std::sync::Arc;
use crate::core::Analyzer;
use crate::models::{ContractTarget, Verdict, AnalysisResult};
use crate::utils::{DetectorError, Result};
use std::collections::HashMap;

pub struct PonziDetector {
    analyzers: Vec<Arc<dyn Analyzer>>,
}

impl PonziDetector {
    pub fn new() -> Self {
        Self {
            analyzers: Vec::new(),
        }
    }

    pub fn add_analyzer(mut self, analyzer: Arc<dyn Analyzer>) -> Self {
        self.analyzers.push(analyzer);
        self
    }

    /// Detect if a contract behaves like a Ponzi scheme
    ///
    /// Analyzer failures are logged and skipped, except model divergence
    /// which is returned to the caller.
    pub fn detect(&self, target: &ContractTarget) -> Result<Verdict> {
        let mut all_findings = Vec::new();
        let mut analyzer_results = HashMap::new();
        let mut weighted_score = 0.0;
        let mut total_weight = 0.0;

        for analyzer in &self.analyzers {
            if !analyzer.can_analyze(target) {
                tracing::debug!("Analyzer '{}' skipped {}", analyzer.name(), target.contract.name);
                continue;
            }

            match analyzer.analyze(target) {
                Ok(result) => {
                    let weight = analyzer.weight();
                    weighted_score += result.risk_score as f64 * weight;
                    total_weight += weight;

                    all_findings.extend(result.findings.clone());
                    analyzer_results.insert(analyzer.name().to_string(), result);
                }
                Err(e @ DetectorError::Diverged(_)) => return Err(e),
                Err(e) => {
                    tracing::warn!("Analyzer '{}' failed: {}", analyzer.name(), e);
                }
            }
        }

        let final_score = if total_weight > 0.0 {
            (weighted_score / total_weight) as u8
        } else {
            0
        };

        let is_ponzi = final_score >= 60;

        let confidence = self.calculate_confidence(&analyzer_results);

        tracing::info!(
            "{}: risk score {} ({} analyzers)",
            target.contract.name,
            final_score,
            analyzer_results.len()
        );

        Ok(Verdict {
            contract: target.contract.name.clone(),
            is_ponzi,
            risk_score: final_score,
            confidence,
            findings: all_findings,
            analyzer_results,
        })
    }

    fn calculate_confidence(&self, results: &HashMap<String, AnalysisResult>) -> f64 {
        if results.is_empty() {
            return 0.0;
        }

        let scores: Vec<f64> = results.values().map(|r| r.risk_score as f64).collect();
        let mean = scores.iter().sum::<f64>() / scores.len() as f64;

        let variance: f64 = scores.iter()
            .map(|&s| {
                let diff = s - mean;
                diff * diff
            })
            .sum::<f64>() / scores.len() as f64;

        let std_dev = variance.sqrt();

        // Low std dev = high agreement = high confidence
        ((50.0 - std_dev.min(50.0)) / 50.0).clamp(0.0, 1.0)
    }
}

impl Default for PonziDetector {
    fn default() -> Self {
        Self::new()
    }
}
