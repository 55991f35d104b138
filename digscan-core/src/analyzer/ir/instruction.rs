//! Program Representation Values and Instructions
//!
//! Every constant, global, argument and instruction is a [`Value`] living in a
//! single arena owned by [`Program`](super::Program) and addressed by a
//! [`ValueId`]. Functions and basic blocks refer to values by id only.
//!
//! # Memory Optimizations
//! - Identifiers are `u32` newtypes instead of `usize`
//! - Operand lists use `SmallVec` (most instructions have four or fewer operands)
//! - Phi incoming lists use `SmallVec<[_; 2]>` (most phis join two edges)

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

/// Identifier of a value in the program arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValueId(pub u32);

impl ValueId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Identifier of a function (index into the function table).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FuncId(pub u32);

impl FuncId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Identifier of a basic block (index into the program-wide block table).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(pub u32);

impl BlockId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Value types.
///
/// Pointers are opaque: the pointee type of an address computation is carried
/// by [`ValueKind::IndexAddr::source`] and the type of a memory access by the
/// loaded or stored value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Type {
    Void,
    I1,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    Ptr,
    /// Named aggregate with its allocation size in bytes.
    Struct { name: String, size: u64 },
}

impl Type {
    /// Store size of the type in bytes (0 for `Void`).
    #[inline]
    pub fn store_size(&self) -> u64 {
        match self {
            Type::Void => 0,
            Type::I1 | Type::I8 => 1,
            Type::I16 => 2,
            Type::I32 | Type::F32 => 4,
            Type::I64 | Type::F64 | Type::Ptr => 8,
            Type::Struct { size, .. } => *size,
        }
    }

    #[inline]
    pub fn is_pointer(&self) -> bool {
        matches!(self, Type::Ptr)
    }

    #[inline]
    pub fn is_integer(&self) -> bool {
        matches!(self, Type::I1 | Type::I8 | Type::I16 | Type::I32 | Type::I64)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::I1 => write!(f, "i1"),
            Type::I8 => write!(f, "i8"),
            Type::I16 => write!(f, "i16"),
            Type::I32 => write!(f, "i32"),
            Type::I64 => write!(f, "i64"),
            Type::F32 => write!(f, "f32"),
            Type::F64 => write!(f, "f64"),
            Type::Ptr => write!(f, "ptr"),
            Type::Struct { name, .. } => write!(f, "%{}", name),
        }
    }
}

/// Conversion operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CastOp {
    SExt,
    ZExt,
    Trunc,
    PtrToInt,
    IntToPtr,
    BitCast,
}

impl CastOp {
    /// Integer width changes that preserve the identity of an index value.
    #[inline]
    pub fn is_int_resize(self) -> bool {
        matches!(self, CastOp::SExt | CastOp::ZExt | CastOp::Trunc)
    }
}

/// Binary arithmetic operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    SDiv,
    UDiv,
    SRem,
    URem,
    Shl,
    LShr,
    AShr,
    And,
    Or,
    Xor,
}

/// Integer comparison predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    Eq,
    Ne,
    Slt,
    Sle,
    Sgt,
    Sge,
    Ult,
    Ule,
    Ugt,
    Uge,
}

/// What a value is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "opcode", rename_all = "snake_case")]
pub enum ValueKind {
    /// Integer constant.
    ConstInt { value: i64 },
    /// Address of a global variable.
    Global { name: String },
    /// Formal parameter of the owning function.
    Argument { index: u32 },
    /// Stack slot: `result = alloca allocated`
    Alloca { allocated: Type },
    /// Memory read: `result = *address`
    Load { address: ValueId },
    /// Memory write: `*address = value`
    Store { value: ValueId, address: ValueId },
    /// Address computation: `result = &base[indices...]` over `source`.
    IndexAddr {
        base: ValueId,
        source: Type,
        indices: SmallVec<[ValueId; 4]>,
    },
    Cast { op: CastOp, source: ValueId },
    Binary { op: BinOp, lhs: ValueId, rhs: ValueId },
    Compare { predicate: Predicate, lhs: ValueId, rhs: ValueId },
    Branch { target: BlockId },
    CondBranch {
        condition: ValueId,
        if_true: BlockId,
        if_false: BlockId,
    },
    /// Direct call when `callee` is known, indirect otherwise.
    Call {
        callee: Option<String>,
        args: SmallVec<[ValueId; 4]>,
    },
    Phi {
        incoming: SmallVec<[(ValueId, BlockId); 2]>,
    },
    Select {
        condition: ValueId,
        if_true: ValueId,
        if_false: ValueId,
    },
    Return { value: Option<ValueId> },
}

impl ValueKind {
    /// Value operands in a fixed order.
    pub fn operands(&self) -> SmallVec<[ValueId; 4]> {
        let mut ops = SmallVec::new();
        match self {
            ValueKind::ConstInt { .. }
            | ValueKind::Global { .. }
            | ValueKind::Argument { .. }
            | ValueKind::Alloca { .. }
            | ValueKind::Branch { .. } => {}
            ValueKind::Load { address } => ops.push(*address),
            ValueKind::Store { value, address } => {
                ops.push(*value);
                ops.push(*address);
            }
            ValueKind::IndexAddr { base, indices, .. } => {
                ops.push(*base);
                ops.extend(indices.iter().copied());
            }
            ValueKind::Cast { source, .. } => ops.push(*source),
            ValueKind::Binary { lhs, rhs, .. } | ValueKind::Compare { lhs, rhs, .. } => {
                ops.push(*lhs);
                ops.push(*rhs);
            }
            ValueKind::CondBranch { condition, .. } => ops.push(*condition),
            ValueKind::Call { args, .. } => ops.extend(args.iter().copied()),
            ValueKind::Phi { incoming } => ops.extend(incoming.iter().map(|(v, _)| *v)),
            ValueKind::Select {
                condition,
                if_true,
                if_false,
            } => {
                ops.push(*condition);
                ops.push(*if_true);
                ops.push(*if_false);
            }
            ValueKind::Return { value } => ops.extend(value.iter().copied()),
        }
        ops
    }

    /// Block operands (branch targets and phi predecessors).
    pub fn block_operands(&self) -> SmallVec<[BlockId; 2]> {
        match self {
            ValueKind::Branch { target } => SmallVec::from_slice(&[*target]),
            ValueKind::CondBranch {
                if_true, if_false, ..
            } => SmallVec::from_slice(&[*if_true, *if_false]),
            ValueKind::Phi { incoming } => incoming.iter().map(|(_, b)| *b).collect(),
            _ => SmallVec::new(),
        }
    }

    /// Instructions live inside a basic block; constants, globals and arguments do not.
    #[inline]
    pub fn is_instruction(&self) -> bool {
        !matches!(
            self,
            ValueKind::ConstInt { .. } | ValueKind::Global { .. } | ValueKind::Argument { .. }
        )
    }
}

/// Arena entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Value {
    pub kind: ValueKind,
    #[serde(rename = "type")]
    pub ty: Type,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<FuncId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block: Option<BlockId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicBlock {
    pub name: String,
    pub function: FuncId,
    pub instructions: Vec<ValueId>,
}

/// A function. Functions without blocks are external declarations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub params: Vec<ValueId>,
    pub return_type: Type,
    #[serde(default)]
    pub blocks: Vec<BlockId>,
}

impl Function {
    #[inline]
    pub fn is_declaration(&self) -> bool {
        self.blocks.is_empty()
    }
}
