//! SSA intermediate representation.
//!
//! This module defines the IR the analyses and transforms operate on:
//! - Arena ids for blocks and instructions
//! - Types, constants and operand values
//! - Instructions, functions and modules (with kernel metadata)
//! - A builder, a verifier and a small interpreter used as a test harness

pub mod arena;
pub mod builder;
pub mod function;
pub mod inst;
pub mod interp;
pub mod module;
pub mod types;
pub mod verify;

/// Index of a block in its function's arena.
pub type BlockId = arena::Id<function::Block>;
/// Index of an instruction in its function's arena.
pub type InstId = arena::Id<inst::Instruction>;

pub use builder::InstBuilder;
pub use function::{Block, Function, Param, UseMap};
pub use inst::{BinaryOp, CastOp, FloatPredicate, InstKind, Instruction, IntPredicate, Opcode};
pub use interp::{Interpreter, RtValue};
pub use module::{Declaration, MetadataOperand, Module, NamedMetadata, KERNEL_ANNOTATIONS};
pub use types::{Constant, Type, Value};
pub use verify::verify_function;
