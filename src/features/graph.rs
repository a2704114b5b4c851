use ndarray::Array2;
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::HashMap;

use super::extractor::{ContractFacts, FunctionRef};
use crate::gnn::GraphData;
use crate::models::{Contract, FunctionId};

/// Node feature width produced by [`FeatureGraphBuilder`]
pub const NODE_FEATURE_SIZE: usize = 8;

/// Edge feature width produced by [`FeatureGraphBuilder`]
pub const EDGE_FEATURE_SIZE: usize = 2;

/// Turns a contract's call graph into a GNN sample.
///
/// Nodes are call-graph nodes in graph-id order. Node features:
///
/// | idx | feature |
/// |-----|---------|
/// | 0 | statement calls `.transfer(`/`.send(` |
/// | 1 | can reach a transfer primitive |
/// | 2 | constructor |
/// | 3 | `ln(1 + state variables read)` |
/// | 4 | `ln(1 + state variables written while moving value)` |
/// | 5 | `ln(1 + statements)` |
/// | 6 | `ln(1 + callers)` |
/// | 7 | `ln(1 + callees)` |
///
/// Edge features are `[caller transfers, callee transfers]`.
pub struct FeatureGraphBuilder;

impl FeatureGraphBuilder {
    pub fn new() -> Self {
        Self
    }

    pub fn build(&self, contract: &Contract, facts: &ContractFacts) -> GraphData {
        let reads = usage_counts(&facts.state_var_read_map);
        let writes = usage_counts(&facts.state_var_write_map);
        let graph = &facts.call_graph;

        let mut x = Array2::<f32>::zeros((graph.node_count(), NODE_FEATURE_SIZE));
        for node in graph.node_indices() {
            let fid = graph[node].fid;
            let mut row = x.row_mut(node.index());

            row[0] = flag(facts.is_send_function(fid));
            if let Some(function) = contract.function(fid) {
                row[1] = flag(function.can_send_eth);
                row[2] = flag(function.is_constructor_like());
                row[5] = scaled(function.nodes.len());
            }
            row[3] = scaled(reads.get(&fid).copied().unwrap_or(0));
            row[4] = scaled(writes.get(&fid).copied().unwrap_or(0));
            row[6] = scaled(graph.neighbors_directed(node, Direction::Incoming).count());
            row[7] = scaled(graph.neighbors_directed(node, Direction::Outgoing).count());
        }

        let mut edge_index = Vec::with_capacity(graph.edge_count());
        let mut edge_attr = Array2::<f32>::zeros((graph.edge_count(), EDGE_FEATURE_SIZE));
        for (i, edge) in graph.edge_references().enumerate() {
            let (source, target) = (edge.source(), edge.target());
            edge_index.push((source.index(), target.index()));
            edge_attr[[i, 0]] = flag(facts.is_send_function(graph[source].fid));
            edge_attr[[i, 1]] = flag(facts.is_send_function(graph[target].fid));
        }

        tracing::debug!(
            "Feature graph for {}: {} nodes, {} edges",
            facts.name,
            graph.node_count(),
            edge_index.len()
        );

        GraphData::new(x, edge_index).with_edge_attr(edge_attr)
    }
}

impl Default for FeatureGraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn usage_counts(map: &HashMap<String, Vec<FunctionRef>>) -> HashMap<FunctionId, usize> {
    let mut counts = HashMap::new();
    for functions in map.values() {
        for function in functions {
            *counts.entry(function.id).or_insert(0) += 1;
        }
    }
    counts
}

fn flag(value: bool) -> f32 {
    if value { 1.0 } else { 0.0 }
}

fn scaled(count: usize) -> f32 {
    (count as f32).ln_1p()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gnn::GraphBatch;
    use crate::models::{Function, Node, StateVariable};

    fn contract() -> Contract {
        let payout = Function::new(2, "payout")
            .sends_eth()
            .with_node(Node::new("investors[i].addr.transfer(share)").reads(&["investors"]).writes(&["paid"]));
        let invest = Function::new(1, "invest")
            .sends_eth()
            .with_node(Node::new("investors.push(msg.sender)").writes(&["investors"]))
            .calls(&payout);

        let mut contract = Contract::new("Chain");
        contract.state_variables = vec![
            StateVariable { name: "investors".into(), ty: "address[]".into(), expression: None },
            StateVariable { name: "paid".into(), ty: "uint256".into(), expression: None },
        ];
        contract.functions = vec![invest, payout];
        contract
    }

    #[test]
    fn test_graph_shape() {
        let contract = contract();
        let facts = ContractFacts::analyze(&contract);
        let graph = FeatureGraphBuilder::new().build(&contract, &facts);

        assert_eq!(graph.x.dim(), (2, NODE_FEATURE_SIZE));
        assert_eq!(graph.edge_index, vec![(0, 1)]);
        assert_eq!(graph.edge_attr.as_ref().unwrap().row(0).to_vec(), vec![0.0, 1.0]);
        assert!(GraphBatch::from_graph(&graph).is_ok());
    }

    #[test]
    fn test_node_features() {
        let contract = contract();
        let facts = ContractFacts::analyze(&contract);
        let graph = FeatureGraphBuilder::new().build(&contract, &facts);

        let invest = graph.x.row(0);
        let payout = graph.x.row(1);
        assert_eq!(invest[0], 0.0);
        assert_eq!(payout[0], 1.0);
        assert_eq!(invest[1], 1.0);
        assert_eq!(invest[4], scaled(1));
        assert_eq!(payout[3], scaled(1));
        assert_eq!(invest[7], scaled(1));
        assert_eq!(payout[6], scaled(1));
    }

    #[test]
    fn test_empty_contract_graph() {
        let contract = Contract::new("Empty");
        let facts = ContractFacts::analyze(&contract);
        let graph = FeatureGraphBuilder::new().build(&contract, &facts);
        assert_eq!(graph.num_nodes(), 0);
        assert_eq!(graph.num_edges(), 0);
    }
}
