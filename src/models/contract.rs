//! Decompiled contract model consumed by the fact extractor.
//!
//! The shapes mirror what a Solidity static-analysis front end reports per
//! contract: structures, state variables, and functions broken into
//! statement nodes with their state-variable reads and writes.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::features::ContractFacts;
use crate::utils::Result;

/// Front-end identifier of a function, stable within one analysis snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FunctionId(pub u64);

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructMember {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Structure {
    pub name: String,
    #[serde(default)]
    pub members: Vec<StructMember>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateVariable {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    /// Inline initializer, e.g. `100 ether` in `uint total = 100 ether;`
    #[serde(default)]
    pub expression: Option<String>,
}

/// One statement of a function body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    #[serde(default)]
    pub expression: Option<String>,
    #[serde(default)]
    pub state_variables_read: Vec<String>,
    #[serde(default)]
    pub state_variables_written: Vec<String>,
}

impl Node {
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: Some(expression.into()),
            ..Self::default()
        }
    }

    pub fn reads(mut self, vars: &[&str]) -> Self {
        self.state_variables_read.extend(vars.iter().map(|v| v.to_string()));
        self
    }

    pub fn writes(mut self, vars: &[&str]) -> Self {
        self.state_variables_written.extend(vars.iter().map(|v| v.to_string()));
        self
    }

    /// Statement source text, empty for synthetic nodes (entry points, joins).
    pub fn expression_text(&self) -> &str {
        self.expression.as_deref().unwrap_or("")
    }

    /// Whether the statement moves native currency via `.transfer(` or `.send(`
    pub fn is_value_transfer(&self) -> bool {
        let text = self.expression_text();
        text.contains(".transfer(") || text.contains(".send(")
    }
}

/// Target of a call made from inside a function body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InternalCall {
    /// Another function of this contract (possibly inherited)
    Function { id: FunctionId, name: String },
    /// Solidity builtin such as `require` or `keccak256`
    Builtin(String),
    /// Front end could not resolve the callee
    Unresolved(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
    pub id: FunctionId,
    pub name: String,
    #[serde(default)]
    pub is_constructor: bool,
    /// Synthetic function holding state-variable initializers
    #[serde(default)]
    pub is_constructor_variables: bool,
    /// Whether execution can reach a native transfer primitive
    #[serde(default)]
    pub can_send_eth: bool,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub internal_calls: Vec<InternalCall>,
}

impl Function {
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id: FunctionId(id),
            name: name.into(),
            is_constructor: false,
            is_constructor_variables: false,
            can_send_eth: false,
            nodes: Vec::new(),
            internal_calls: Vec::new(),
        }
    }

    pub fn constructor(mut self) -> Self {
        self.is_constructor = true;
        self
    }

    pub fn sends_eth(mut self) -> Self {
        self.can_send_eth = true;
        self
    }

    pub fn with_node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn calls(mut self, callee: &Function) -> Self {
        self.internal_calls.push(InternalCall::Function {
            id: callee.id,
            name: callee.name.clone(),
        });
        self
    }

    pub fn is_constructor_like(&self) -> bool {
        self.is_constructor || self.is_constructor_variables
    }

    /// State variables read anywhere in the body, first-seen order, no repeats.
    pub fn state_variables_read(&self) -> Vec<&str> {
        collect_unique(self.nodes.iter().flat_map(|n| n.state_variables_read.iter()))
    }

    /// State variables written anywhere in the body, first-seen order, no repeats.
    pub fn state_variables_written(&self) -> Vec<&str> {
        collect_unique(self.nodes.iter().flat_map(|n| n.state_variables_written.iter()))
    }
}

fn collect_unique<'a>(names: impl Iterator<Item = &'a String>) -> Vec<&'a str> {
    let mut out: Vec<&str> = Vec::new();
    for name in names {
        if !out.contains(&name.as_str()) {
            out.push(name);
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    pub name: String,
    #[serde(default)]
    pub structures: Vec<Structure>,
    #[serde(default)]
    pub state_variables: Vec<StateVariable>,
    #[serde(default)]
    pub functions: Vec<Function>,
}

impl Contract {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            structures: Vec::new(),
            state_variables: Vec::new(),
            functions: Vec::new(),
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn state_variable(&self, name: &str) -> Option<&StateVariable> {
        self.state_variables.iter().find(|v| v.name == name)
    }

    pub fn function(&self, id: FunctionId) -> Option<&Function> {
        self.functions.iter().find(|f| f.id == id)
    }
}

/// A contract together with the facts extracted from it.
#[derive(Debug, Clone)]
pub struct ContractTarget {
    pub contract: Contract,
    pub facts: ContractFacts,
}

impl ContractTarget {
    pub fn new(contract: Contract) -> Self {
        let facts = ContractFacts::analyze(&contract);
        Self { contract, facts }
    }
}
