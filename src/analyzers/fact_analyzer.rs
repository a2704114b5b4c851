use petgraph::algo::tarjan_scc;
use crate::core::Analyzer;
use crate::features::ContractFacts;
use crate::models::*;
use crate::utils::Result;

/// Rule-based analyzer over extracted contract facts
/// Flags the money-flow shapes typical of Ponzi payouts without the GNN
pub struct FactAnalyzer {
    // Type fragments marking per-investor bookkeeping
    ledger_types: Vec<&'static str>,
}

impl FactAnalyzer {
    pub fn new() -> Self {
        Self {
            ledger_types: vec!["[]", "mapping"],
        }
    }

    fn analyze_facts(&self, contract: &Contract, facts: &ContractFacts) -> (Vec<Finding>, u8) {
        let mut findings = Vec::new();

        // 1. Who moves value
        findings.extend(self.check_value_transfers(facts));

        // 2. State shared between deposits and payouts
        findings.extend(self.check_shared_ledgers(contract, facts));

        // 3. Payouts reachable through call cycles
        findings.extend(self.check_payout_cycles(facts));

        // 4. Investor record structs
        findings.extend(self.check_investor_structs(facts));

        let risk_score = findings
            .iter()
            .map(|f| self.severity_score(f.severity))
            .sum::<u32>()
            .min(100) as u8;

        (findings, risk_score)
    }

    fn check_value_transfers(&self, facts: &ContractFacts) -> Vec<Finding> {
        if facts.send_functions.is_empty() {
            return vec![Finding::new(
                Severity::Info,
                Category::ValueTransfer,
                "No direct transfer/send calls",
            )];
        }

        let mut sends: Vec<_> = facts.send_functions.values().collect();
        sends.sort_by_key(|s| s.id);

        sends
            .into_iter()
            .map(|send| {
                Finding::new(
                    Severity::Low,
                    Category::ValueTransfer,
                    format!("{}() transfers value", send.name),
                )
                .with_evidence(serde_json::json!({
                    "statement": send.exp,
                    "node_index": send.node_index,
                }))
            })
            .collect()
    }

    fn check_shared_ledgers(&self, contract: &Contract, facts: &ContractFacts) -> Vec<Finding> {
        let mut findings = Vec::new();

        let mut vars: Vec<_> = facts.state_var_write_map.iter().collect();
        vars.sort_by(|a, b| a.0.cmp(b.0));

        for (var, writers) in vars {
            let payers: Vec<&str> = facts
                .state_var_read_map
                .get(var)
                .into_iter()
                .flatten()
                .filter(|f| facts.is_send_function(f.id))
                .map(|f| f.name.as_str())
                .collect();
            if payers.is_empty() {
                continue;
            }

            let is_ledger = contract
                .state_variable(var)
                .map(|v| self.ledger_types.iter().any(|t| v.ty.contains(t)))
                .unwrap_or(false);
            let writer_names: Vec<&str> = writers.iter().map(|f| f.name.as_str()).collect();

            findings.push(Finding {
                severity: if is_ledger { Severity::Critical } else { Severity::High },
                category: Category::SharedLedger,
                message: format!(
                    "Payouts read `{}`, which value-moving functions write",
                    var
                ),
                evidence: Some(serde_json::json!({
                    "variable": var,
                    "writers": writer_names,
                    "payers": payers,
                    "collection": is_ledger,
                })),
            });
        }

        findings
    }

    fn check_payout_cycles(&self, facts: &ContractFacts) -> Vec<Finding> {
        let graph = &facts.call_graph;
        let mut findings = Vec::new();

        for component in tarjan_scc(graph) {
            let cyclic = component.len() > 1
                || component.iter().any(|&n| graph.contains_edge(n, n));
            if !cyclic {
                continue;
            }

            let mut names: Vec<&str> = component
                .iter()
                .filter(|&&n| facts.is_send_function(graph[n].fid))
                .map(|&n| graph[n].label.as_str())
                .collect();
            if names.is_empty() {
                continue;
            }
            names.sort_unstable();

            findings.push(
                Finding::new(
                    Severity::Medium,
                    Category::CallStructure,
                    format!("Transfer inside a call cycle ({})", names.join(", ")),
                )
                .with_evidence(serde_json::json!({ "cycle_size": component.len() })),
            );
        }

        findings
    }

    fn check_investor_structs(&self, facts: &ContractFacts) -> Vec<Finding> {
        let mut structs: Vec<_> = facts.structs.values().collect();
        structs.sort_by(|a, b| a.name.cmp(&b.name));

        structs
            .into_iter()
            .filter(|s| {
                s.members.iter().any(|m| m.ty.starts_with("address"))
                    && s.members.iter().any(|m| m.ty.starts_with("uint"))
            })
            .map(|s| {
                Finding::new(
                    Severity::Low,
                    Category::SharedLedger,
                    format!("Struct {} pairs addresses with amounts", s.name),
                )
            })
            .collect()
    }

    fn severity_score(&self, severity: Severity) -> u32 {
        match severity {
            Severity::Critical => 50,
            Severity::High => 30,
            Severity::Medium => 15,
            Severity::Low => 5,
            Severity::Info => 0,
        }
    }
}

impl Default for FactAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl Analyzer for FactAnalyzer {
    fn name(&self) -> &'static str {
        "static-fact-analysis"
    }

    fn analyze(&self, target: &ContractTarget) -> Result<AnalysisResult> {
        tracing::info!(
            "Running fact analysis on {} ({} functions)",
            target.contract.name,
            target.contract.functions.len()
        );

        let (findings, risk_score) = self.analyze_facts(&target.contract, &target.facts);

        tracing::info!(
            "Fact analysis complete: {} findings, risk score: {}",
            findings.len(),
            risk_score
        );

        Ok(AnalysisResult::new(risk_score).with_findings(findings))
    }

    fn weight(&self) -> f64 {
        0.40
    }
}
