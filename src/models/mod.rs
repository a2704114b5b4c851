pub mod finding;
pub mod contract;
pub mod analysis;

pub use finding::{Finding, Severity, Category};
pub use contract::{
    Contract, ContractTarget, Function, FunctionId, InternalCall, Node, StateVariable,
    StructMember, Structure,
};
pub use analysis::{AnalysisResult, Verdict};
