//! Program Representation
//!
//! A minimal SSA arena exposing the queries the analysis needs: functions and
//! instructions in declaration order, instruction kinds and operands, callee
//! identifiers, and the users of every value.

pub mod builder;
pub mod instruction;
pub mod program;

pub use builder::ProgramBuilder;
pub use instruction::{
    BasicBlock, BinOp, BlockId, CastOp, FuncId, Function, Predicate, Type, Value, ValueId,
    ValueKind,
};
pub use program::Program;
