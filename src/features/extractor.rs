//! Contract fact extraction
//!
//! Walks one contract's declarations and records what the Ponzi classifier
//! cares about: struct definitions, where state variables are declared, read
//! and written, which functions move native currency, and who calls whom.

use petgraph::graph::{DiGraph, NodeIndex};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

use crate::models::{Contract, Function, FunctionId, InternalCall, Node, Structure};

/// Lightweight handle to a contract function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionRef {
    pub id: FunctionId,
    pub name: String,
}

impl From<&Function> for FunctionRef {
    fn from(function: &Function) -> Self {
        Self {
            id: function.id,
            name: function.name.clone(),
        }
    }
}

/// How a state variable comes into existence.
///
/// A variable is either declared bare (no initializer) or assigned by the
/// constructor; a constructor assignment replaces the bare stub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Declaration {
    Uninitialized {
        #[serde(rename = "type")]
        ty: String,
        exp: String,
    },
    Constructor {
        fun: FunctionRef,
        expr: String,
        full_expr: String,
    },
}

/// A function that directly calls `.transfer(` or `.send(`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendFunction {
    pub id: FunctionId,
    pub name: String,
    /// Text of the first transferring statement
    pub exp: String,
    pub node_index: usize,
    pub node: Node,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallNode {
    pub label: String,
    pub fid: FunctionId,
}

pub type CallGraph = DiGraph<CallNode, ()>;

/// Immutable per-contract facts.
#[derive(Debug, Clone)]
pub struct ContractFacts {
    pub name: String,
    pub structs: HashMap<String, Structure>,
    pub send_functions: HashMap<FunctionId, SendFunction>,
    pub call_graph: CallGraph,
    pub func_id_to_graph_id: HashMap<FunctionId, NodeIndex>,
    pub state_var_declare_map: HashMap<String, Declaration>,
    pub state_var_read_map: HashMap<String, Vec<FunctionRef>>,
    pub state_var_write_map: HashMap<String, Vec<FunctionRef>>,
}

impl ContractFacts {
    pub fn analyze(contract: &Contract) -> Self {
        let mut facts = Self {
            name: contract.name.clone(),
            structs: HashMap::new(),
            send_functions: HashMap::new(),
            call_graph: CallGraph::new(),
            func_id_to_graph_id: HashMap::new(),
            state_var_declare_map: HashMap::new(),
            state_var_read_map: HashMap::new(),
            state_var_write_map: HashMap::new(),
        };

        facts.extract_structs(contract);
        facts.extract_state_vars(contract);
        facts.extract_send_functions(contract);
        facts.build_call_graph(contract);

        tracing::debug!(
            "Facts for {}: {} structs, {} send functions, call graph {} nodes / {} edges",
            facts.name,
            facts.structs.len(),
            facts.send_functions.len(),
            facts.node_count(),
            facts.edge_count()
        );

        facts
    }

    fn extract_structs(&mut self, contract: &Contract) {
        for structure in &contract.structures {
            self.structs.insert(structure.name.clone(), structure.clone());
        }
    }

    fn extract_state_vars(&mut self, contract: &Contract) {
        for var in &contract.state_variables {
            if var.expression.is_none() {
                self.state_var_declare_map.insert(
                    var.name.clone(),
                    Declaration::Uninitialized {
                        ty: var.ty.clone(),
                        exp: format!("{} {}", var.ty, var.name),
                    },
                );
            }
        }

        for function in &contract.functions {
            if function.is_constructor_like() {
                self.record_constructor_writes(contract, function);
                continue;
            }

            for var in function.state_variables_read() {
                self.state_var_read_map
                    .entry(var.to_string())
                    .or_default()
                    .push(FunctionRef::from(function));
            }

            // Only value-moving functions count as writers
            if !function.can_send_eth {
                continue;
            }
            for var in function.state_variables_written() {
                self.state_var_write_map
                    .entry(var.to_string())
                    .or_default()
                    .push(FunctionRef::from(function));
            }
        }
    }

    fn record_constructor_writes(&mut self, contract: &Contract, function: &Function) {
        for node in &function.nodes {
            for name in &node.state_variables_written {
                let expr = node.expression_text().to_string();
                let full_expr = match contract.state_variable(name) {
                    Some(var) => format!("{} {}", var.ty, expr),
                    None => {
                        tracing::debug!(
                            "{}: constructor {} writes undeclared variable {}",
                            contract.name,
                            function.name,
                            name
                        );
                        expr.clone()
                    }
                };

                self.state_var_declare_map.insert(
                    name.clone(),
                    Declaration::Constructor {
                        fun: FunctionRef::from(function),
                        full_expr,
                        expr,
                    },
                );
            }
        }
    }

    fn extract_send_functions(&mut self, contract: &Contract) {
        for function in &contract.functions {
            for (node_index, node) in function.nodes.iter().enumerate() {
                if !node.is_value_transfer() || self.send_functions.contains_key(&function.id) {
                    continue;
                }
                self.send_functions.insert(
                    function.id,
                    SendFunction {
                        id: function.id,
                        name: function.name.clone(),
                        exp: node.expression_text().to_string(),
                        node_index,
                        node: node.clone(),
                    },
                );
            }
        }
    }

    fn build_call_graph(&mut self, contract: &Contract) {
        let mut seen: HashSet<(NodeIndex, NodeIndex)> = HashSet::new();

        for function in &contract.functions {
            let from = self.graph_node(function.id, &function.name);

            for call in &function.internal_calls {
                let (id, name) = match call {
                    InternalCall::Function { id, name } => (*id, name),
                    InternalCall::Builtin(_) => continue,
                    InternalCall::Unresolved(target) => {
                        tracing::debug!(
                            "{}: unresolved call target {:?} in {}, skipping edge",
                            contract.name,
                            target,
                            function.name
                        );
                        continue;
                    }
                };

                let to = self.graph_node(id, name);
                if seen.insert((from, to)) {
                    self.call_graph.add_edge(from, to, ());
                }
            }
        }
    }

    /// Node for `fid`, created on first sight.
    fn graph_node(&mut self, fid: FunctionId, label: &str) -> NodeIndex {
        if let Some(&index) = self.func_id_to_graph_id.get(&fid) {
            return index;
        }
        let index = self.call_graph.add_node(CallNode {
            label: label.to_string(),
            fid,
        });
        self.func_id_to_graph_id.insert(fid, index);
        index
    }

    pub fn graph_id(&self, fid: FunctionId) -> Option<NodeIndex> {
        self.func_id_to_graph_id.get(&fid).copied()
    }

    pub fn is_send_function(&self, fid: FunctionId) -> bool {
        self.send_functions.contains_key(&fid)
    }

    pub fn node_count(&self) -> usize {
        self.call_graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.call_graph.edge_count()
    }

    /// Dump the state-variable tables at debug level.
    pub fn log_state_var_info(&self) {
        for line in self.state_var_report() {
            tracing::debug!("{}", line);
        }
    }

    /// State-variable tables as text, variables in name order.
    pub fn state_var_report(&self) -> Vec<String> {
        let mut lines = vec![format!("=== {} state variable declarations", self.name)];
        let mut declarations: Vec<_> = self.state_var_declare_map.iter().collect();
        declarations.sort_by(|a, b| a.0.cmp(b.0));
        for (var, declaration) in declarations {
            lines.push(match declaration {
                Declaration::Uninitialized { exp, .. } => format!("  {}: {}", var, exp),
                Declaration::Constructor { fun, full_expr, .. } => {
                    format!("  {}: {} (in {})", var, full_expr, fun.name)
                }
            });
        }

        for (label, map) in [("reads", &self.state_var_read_map), ("writes", &self.state_var_write_map)] {
            lines.push(format!("=== {} state variable {}", self.name, label));
            let mut vars: Vec<_> = map.iter().collect();
            vars.sort_by(|a, b| a.0.cmp(b.0));
            for (var, functions) in vars {
                let names: Vec<&str> = functions.iter().map(|f| f.name.as_str()).collect();
                lines.push(format!("  {}: {}", var, names.join(", ")));
            }
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{StateVariable, StructMember};

    fn var(name: &str, ty: &str) -> StateVariable {
        StateVariable {
            name: name.into(),
            ty: ty.into(),
            expression: None,
        }
    }

    /// One struct, two variables, A calls B twice and B calls C.
    fn sample_contract() -> Contract {
        let c = Function::new(3, "C").with_node(Node::new("return investors.length").reads(&["investors"]));
        let b = Function::new(2, "B")
            .with_node(Node::new("investors.push(Investor(msg.sender, msg.value))").writes(&["investors"]))
            .calls(&c);
        let a = Function::new(1, "A")
            .sends_eth()
            .with_node(Node::new("X += msg.value").reads(&["X"]).writes(&["X"]))
            .with_node(Node::new("owner.transfer(msg.value / 10)").reads(&["owner"]))
            .calls(&b)
            .calls(&b);
        let ctor = Function::new(0, "constructor")
            .constructor()
            .with_node(Node::new("owner = msg.sender").writes(&["owner"]));

        let mut contract = Contract::new("Pyramid");
        contract.structures.push(Structure {
            name: "Investor".into(),
            members: vec![
                StructMember { name: "addr".into(), ty: "address".into() },
                StructMember { name: "amount".into(), ty: "uint256".into() },
            ],
        });
        contract.state_variables = vec![var("X", "uint256"), var("owner", "address")];
        contract.functions = vec![ctor, a, b, c];
        contract
    }

    #[test]
    fn test_end_to_end_facts() {
        let facts = ContractFacts::analyze(&sample_contract());

        assert_eq!(facts.structs.len(), 1);
        assert_eq!(facts.node_count(), 4);
        assert_eq!(facts.edge_count(), 2);

        let a = facts.graph_id(FunctionId(1)).unwrap();
        let b = facts.graph_id(FunctionId(2)).unwrap();
        let c = facts.graph_id(FunctionId(3)).unwrap();
        assert_eq!(facts.call_graph.edges_connecting(a, b).count(), 1);
        assert_eq!(facts.call_graph.edges_connecting(b, c).count(), 1);

        assert_eq!(facts.state_var_write_map.len(), 1);
        let writers = &facts.state_var_write_map["X"];
        assert_eq!(writers.len(), 1);
        assert_eq!(writers[0].name, "A");
        assert!(!facts.state_var_write_map.contains_key("investors"));

        assert_eq!(facts.send_functions.len(), 1);
        assert!(facts.is_send_function(FunctionId(1)));
    }

    #[test]
    fn test_declaration_shapes() {
        let facts = ContractFacts::analyze(&sample_contract());

        match &facts.state_var_declare_map["X"] {
            Declaration::Uninitialized { ty, exp } => {
                assert_eq!(ty, "uint256");
                assert_eq!(exp, "uint256 X");
            }
            other => panic!("unexpected declaration {:?}", other),
        }

        match &facts.state_var_declare_map["owner"] {
            Declaration::Constructor { fun, expr, full_expr } => {
                assert_eq!(fun.name, "constructor");
                assert_eq!(expr, "owner = msg.sender");
                assert_eq!(full_expr, "address owner = msg.sender");
            }
            other => panic!("unexpected declaration {:?}", other),
        }

        let json = serde_json::to_value(&facts.state_var_declare_map["X"]).unwrap();
        assert_eq!(json["type"], "uint256");
        assert!(json.get("full_expr").is_none());
    }

    #[test]
    fn test_empty_contract() {
        let facts = ContractFacts::analyze(&Contract::new("Empty"));
        assert_eq!(facts.node_count(), 0);
        assert_eq!(facts.edge_count(), 0);
        assert!(facts.func_id_to_graph_id.is_empty());
    }

    #[test]
    fn test_initialized_variable_has_no_stub() {
        let mut contract = Contract::new("Fee");
        contract.state_variables.push(StateVariable {
            name: "fee".into(),
            ty: "uint256".into(),
            expression: Some("10".into()),
        });
        let facts = ContractFacts::analyze(&contract);
        assert!(facts.state_var_declare_map.is_empty());
    }

    #[test]
    fn test_reads_append_per_function() {
        let f = Function::new(1, "f").with_node(Node::new("x").reads(&["total"]));
        let g = Function::new(2, "g")
            .with_node(Node::new("y").reads(&["total"]))
            .with_node(Node::new("z").reads(&["total"]));
        let mut contract = Contract::new("Reads");
        contract.functions = vec![f, g];

        let facts = ContractFacts::analyze(&contract);
        let names: Vec<&str> = facts.state_var_read_map["total"].iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["f", "g"]);
    }

    #[test]
    fn test_first_transfer_statement_wins() {
        let f = Function::new(1, "payout")
            .with_node(Node::new("a.transfer(1)"))
            .with_node(Node::new("b.send(2)"));
        let mut contract = Contract::new("Payout");
        contract.functions = vec![f];

        let facts = ContractFacts::analyze(&contract);
        let send = &facts.send_functions[&FunctionId(1)];
        assert_eq!(send.exp, "a.transfer(1)");
        assert_eq!(send.node_index, 0);
    }

    #[test]
    fn test_recursion_and_lazy_ids() {
        // `a` calls `b` before `b` is declared, `b` calls back into `a` and itself
        let mut a = Function::new(10, "a");
        let mut b = Function::new(20, "b");
        a.internal_calls.push(InternalCall::Function { id: b.id, name: "b".into() });
        b.internal_calls.push(InternalCall::Function { id: a.id, name: "a".into() });
        b.internal_calls.push(InternalCall::Function { id: b.id, name: "b".into() });
        b.internal_calls.push(InternalCall::Builtin("require(bool)".into()));
        b.internal_calls.push(InternalCall::Unresolved("library call".into()));

        let mut contract = Contract::new("Loop");
        contract.functions = vec![a, b];

        let facts = ContractFacts::analyze(&contract);
        assert_eq!(facts.node_count(), 2);
        assert_eq!(facts.edge_count(), 3);
        assert_eq!(facts.graph_id(FunctionId(10)).unwrap().index(), 0);
        assert_eq!(facts.graph_id(FunctionId(20)).unwrap().index(), 1);
        assert!(petgraph::algo::is_cyclic_directed(&facts.call_graph));
    }

    #[test]
    fn test_inherited_callee_becomes_node() {
        let f = Function::new(1, "invest");
        let mut contract = Contract::new("Child");
        contract.functions = vec![f];
        contract.functions[0]
            .internal_calls
            .push(InternalCall::Function { id: FunctionId(99), name: "_distribute".into() });

        let facts = ContractFacts::analyze(&contract);
        assert_eq!(facts.node_count(), 2);
        let node = facts.graph_id(FunctionId(99)).unwrap();
        assert_eq!(facts.call_graph[node].label, "_distribute");
    }

    #[test]
    fn test_constructor_keeps_undeclared_write() {
        let mut contract = sample_contract();
        contract.functions[0] = Function::new(0, "constructor")
            .constructor()
            .with_node(Node::new("owner = msg.sender").writes(&["owner"]))
            .with_node(Node::new("base = 1 ether").writes(&["base"]));

        let facts = ContractFacts::analyze(&contract);
        match &facts.state_var_declare_map["base"] {
            Declaration::Constructor { fun, expr, full_expr } => {
                assert_eq!(fun.name, "constructor");
                assert_eq!(expr, "base = 1 ether");
                assert_eq!(full_expr, "base = 1 ether");
            }
            other => panic!("unexpected declaration {:?}", other),
        }
    }

    #[test]
    fn test_state_var_report_is_sorted() {
        let facts = ContractFacts::analyze(&sample_contract());
        let report = facts.state_var_report();

        assert_eq!(
            report,
            vec![
                "=== Pyramid state variable declarations",
                "  X: uint256 X",
                "  owner: address owner = msg.sender (in constructor)",
                "=== Pyramid state variable reads",
                "  X: A",
                "  investors: C",
                "  owner: A",
                "=== Pyramid state variable writes",
                "  X: A",
            ]
        );
        assert_eq!(report, facts.state_var_report());
    }
}
