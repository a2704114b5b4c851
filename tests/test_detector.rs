use ponzi_detector::analyzers::{FactAnalyzer, GnnAnalyzer};
use ponzi_detector::features::{Declaration, FeatureGraphBuilder, EDGE_FEATURE_SIZE, NODE_FEATURE_SIZE};
use ponzi_detector::models::{Function, FunctionId, Node, StateVariable, StructMember, Structure};
use ponzi_detector::*;
use std::sync::Arc;

fn var(name: &str, ty: &str) -> StateVariable {
    StateVariable { name: name.into(), ty: ty.into(), expression: None }
}

/// A calls B twice, B calls C; A sends value and writes X; the constructor sets `owner`.
fn scenario(a_transfers: bool) -> Contract {
    let c = Function::new(3, "C").with_node(Node::new("return X").reads(&["X"]));
    let b = Function::new(2, "B")
        .with_node(Node::new("X = X + 1").reads(&["X"]).writes(&["X"]))
        .calls(&c);
    let a_stmt = if a_transfers { "owner.transfer(X)" } else { "owner.call{value: X}(\"\")" };
    let a = Function::new(1, "A")
        .sends_eth()
        .with_node(Node::new("X = msg.value").writes(&["X"]))
        .with_node(Node::new(a_stmt).reads(&["owner", "X"]))
        .calls(&b)
        .calls(&b);
    let ctor = Function::new(0, "constructor")
        .constructor()
        .with_node(Node::new("owner = msg.sender").writes(&["owner"]));

    let mut contract = Contract::new("Scenario");
    contract.structures.push(Structure {
        name: "Player".into(),
        members: vec![StructMember { name: "addr".into(), ty: "address".into() }],
    });
    contract.state_variables = vec![var("X", "uint256"), var("owner", "address")];
    contract.functions = vec![a, b, c, ctor];
    contract
}

#[test]
fn test_scenario_facts() {
    let contract = scenario(true);
    let facts = ContractFacts::analyze(&contract);

    assert_eq!(facts.structs.len(), 1);
    assert_eq!(facts.node_count(), contract.functions.len());
    assert_eq!(facts.edge_count(), 2);

    let a = facts.graph_id(FunctionId(1)).unwrap();
    let b = facts.graph_id(FunctionId(2)).unwrap();
    let c = facts.graph_id(FunctionId(3)).unwrap();
    assert!(facts.call_graph.contains_edge(a, b));
    assert!(facts.call_graph.contains_edge(b, c));

    let writers: Vec<&str> = facts.state_var_write_map["X"].iter().map(|f| f.name.as_str()).collect();
    assert_eq!(writers, vec!["A"]);
    assert_eq!(facts.state_var_write_map.len(), 1);

    assert!(matches!(facts.state_var_declare_map["X"], Declaration::Uninitialized { .. }));
    assert!(matches!(facts.state_var_declare_map["owner"], Declaration::Constructor { .. }));

    assert_eq!(facts.send_functions.len(), 1);
    assert!(facts.is_send_function(FunctionId(1)));

    facts.log_state_var_info();
}

#[test]
fn test_send_map_needs_textual_match() {
    let facts = ContractFacts::analyze(&scenario(false));
    assert!(facts.send_functions.is_empty());
    // capability alone still admits A's writes
    assert!(facts.state_var_write_map.contains_key("X"));
}

#[test]
fn test_end_to_end_pipeline() {
    let contract = scenario(true);
    let target = ContractTarget::new(contract.clone());

    let config = GnnConfig {
        feature_size: NODE_FEATURE_SIZE,
        edge_dim: EDGE_FEATURE_SIZE,
        layers: 2,
        ..GnnConfig::default()
    };
    let model = GraphClassifier::new(&config, 8).unwrap();

    let detector = PonziDetector::new()
        .add_analyzer(Arc::new(FactAnalyzer::new()))
        .add_analyzer(Arc::new(GnnAnalyzer::new(model)));
    let verdict = detector.detect(&target).unwrap();

    assert_eq!(verdict.contract, "Scenario");
    assert_eq!(verdict.analyzer_results.len(), 2);
    assert!(verdict.risk_score <= 100);
    assert!((0.0..=1.0).contains(&verdict.confidence));
    assert!(verdict.to_string().contains("PONZI DETECTION REPORT"));

    // Same graphs through training-style batching and evaluation
    let builder = FeatureGraphBuilder::new();
    let ponzi = builder.build(&contract, &target.facts).with_label(true);
    let plain = builder
        .build(&scenario(false), &ContractFacts::analyze(&scenario(false)))
        .with_label(false);
    let batch = GraphBatch::collate(&[ponzi, plain]).unwrap();

    let mut model = GraphClassifier::new(&config, 8).unwrap();
    let scores = model.forward(&batch).unwrap();
    assert!(scores.iter().all(|p| (0.0..=1.0).contains(p)));

    let result = evaluate(&mut model, &[batch]).unwrap();
    assert!(!model.is_training());
    assert_eq!(result.graphs, 2);
    assert!((0.0..=1.0).contains(&result.accuracy));
    assert!(result.mean_loss.is_finite());
}

#[test]
fn test_divergence_scenario() {
    let contract = scenario(true);
    let facts = ContractFacts::analyze(&contract);
    let graph = FeatureGraphBuilder::new().build(&contract, &facts);
    let batch = GraphBatch::from_graph(&graph).unwrap();

    let mut model = GraphClassifier::new(&GnnConfig::default(), 8).unwrap();
    model.eval();
    assert!(model.forward(&batch).is_ok());

    for (name, mut param) in model.named_parameters_mut() {
        if name == "linear2.weight" {
            if let Some(w) = param.iter_mut().next() {
                *w = f32::NAN;
            }
        }
    }

    match model.forward(&batch) {
        Err(DetectorError::Diverged(_)) => {}
        other => panic!("expected divergence, got {:?}", other),
    }
}
