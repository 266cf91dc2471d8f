//! Atom selections for molecular trajectories.
//!
//! A [`SelectionCollection`] parses selection statements such as
//! `"name CA and within 0.5 of resname LIG"` into one shared expression
//! forest, resolves references to external index groups, compiles the forest
//! into a type-checked plan with shared subexpressions and position
//! computations, and then evaluates every selection once per frame.

pub mod arena;
pub mod ast;
pub mod collection;
pub mod compiler;
pub mod config;
pub mod debug;
pub mod error;
mod evaluator;
pub mod index;
pub mod lexer;
pub mod methods;
mod parser;
pub mod poscalc;
mod resolve;
pub mod selection;
pub mod source;
pub mod symbols;

pub use arena::{ArenaStats, EvalArena};
pub use collection::SelectionCollection;
pub use compiler::{CompiledPlan, PlanStep};
pub use config::CollectionConfig;
pub use debug::{DebugObserver, Phase, WriterObserver};
pub use error::{Diagnostic, Diagnostics, Result, SelectionError};
pub use index::{AtomIndexSet, IndexGroup, IndexGroups};
pub use methods::{
    EvalContext, MethodArg, MethodFlags, MethodId, MethodOutput, MethodRegistry, MethodSignature,
    ParamKind, ParamSpec, SelectionMethod,
};
pub use selection::{SelectionHandle, SelectionView};
pub use source::{Interactive, LineSource, Prompt, ReaderSource, StdinSource};

pub use rst_core::{Frame, Pbc, PositionType, Topology};
