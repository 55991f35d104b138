//! Program construction.
//!
//! [`ProgramBuilder`] appends values to the arena and places instructions at
//! the end of the current block, mirroring how a front end emits code.
//!
//! # Examples
//! ```
//! use digscan_core::analyzer::ir::{ProgramBuilder, Type};
//!
//! let mut b = ProgramBuilder::new();
//! b.begin_function("main", &[], Type::I32);
//! let entry = b.block("entry");
//! b.position_at(entry);
//! let size = b.const_i64(400);
//! let _a = b.call("malloc", &[size], Type::Ptr);
//! let zero = b.const_i32(0);
//! b.ret(Some(zero));
//! let program = b.finish().unwrap();
//! assert_eq!(program.functions().len(), 1);
//! ```

use crate::analyzer::error::DigError;
use crate::analyzer::ir::instruction::{
    BasicBlock, BinOp, BlockId, CastOp, FuncId, Function, Predicate, Type, Value, ValueId,
    ValueKind,
};
use crate::analyzer::ir::program::Program;
use smallvec::SmallVec;

/// Incremental builder for [`Program`].
#[derive(Debug, Default)]
pub struct ProgramBuilder {
    program: Program,
    current_function: Option<FuncId>,
    current_block: Option<BlockId>,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push_value(&mut self, kind: ValueKind, ty: Type) -> ValueId {
        let id = ValueId(self.program.values.len() as u32);
        let (function, block) = if kind.is_instruction() {
            (self.current_function, self.current_block)
        } else {
            (None, None)
        };
        self.program.values.push(Value {
            kind,
            ty,
            name: None,
            function,
            block,
        });
        if let Some(block) = block {
            self.program.blocks[block.index()].instructions.push(id);
        }
        id
    }

    /// Give a value a readable name.
    pub fn name(&mut self, value: ValueId, name: impl Into<String>) -> ValueId {
        self.program.values[value.index()].name = Some(name.into());
        value
    }

    pub fn constant(&mut self, value: i64, ty: Type) -> ValueId {
        self.push_value(ValueKind::ConstInt { value }, ty)
    }

    pub fn const_i64(&mut self, value: i64) -> ValueId {
        self.constant(value, Type::I64)
    }

    pub fn const_i32(&mut self, value: i64) -> ValueId {
        self.constant(value, Type::I32)
    }

    /// Address of a global variable.
    pub fn global(&mut self, name: impl Into<String>) -> ValueId {
        let name = name.into();
        let id = self.push_value(ValueKind::Global { name: name.clone() }, Type::Ptr);
        self.program.values[id.index()].name = Some(name);
        id
    }

    /// Start a function with the given parameter types and make it current.
    pub fn begin_function(&mut self, name: impl Into<String>, params: &[Type], return_type: Type) -> FuncId {
        let id = FuncId(self.program.functions.len() as u32);
        self.program.functions.push(Function {
            name: name.into(),
            params: Vec::with_capacity(params.len()),
            return_type,
            blocks: Vec::new(),
        });
        for (index, ty) in params.iter().enumerate() {
            let arg = ValueId(self.program.values.len() as u32);
            self.program.values.push(Value {
                kind: ValueKind::Argument { index: index as u32 },
                ty: ty.clone(),
                name: None,
                function: Some(id),
                block: None,
            });
            self.program.functions[id.index()].params.push(arg);
        }
        self.current_function = Some(id);
        self.current_block = None;
        id
    }

    /// Add an external declaration (a function without a body).
    pub fn declare_function(&mut self, name: impl Into<String>, return_type: Type) -> FuncId {
        let id = FuncId(self.program.functions.len() as u32);
        self.program.functions.push(Function {
            name: name.into(),
            params: Vec::new(),
            return_type,
            blocks: Vec::new(),
        });
        id
    }

    /// Parameter `index` of the current function.
    pub fn param(&self, index: usize) -> Option<ValueId> {
        let function = self.current_function?;
        self.program.functions[function.index()].params.get(index).copied()
    }

    /// Append a new block to the current function.
    pub fn block(&mut self, name: impl Into<String>) -> BlockId {
        let id = BlockId(self.program.blocks.len() as u32);
        let function = self.current_function.unwrap_or(FuncId(u32::MAX));
        self.program.blocks.push(BasicBlock {
            name: name.into(),
            function,
            instructions: Vec::new(),
        });
        if let Some(f) = self.current_function {
            self.program.functions[f.index()].blocks.push(id);
        }
        id
    }

    /// Emit subsequent instructions at the end of `block`.
    pub fn position_at(&mut self, block: BlockId) {
        self.current_block = Some(block);
    }

    pub fn alloca(&mut self, allocated: Type) -> ValueId {
        self.push_value(ValueKind::Alloca { allocated }, Type::Ptr)
    }

    pub fn load(&mut self, ty: Type, address: ValueId) -> ValueId {
        self.push_value(ValueKind::Load { address }, ty)
    }

    pub fn store(&mut self, value: ValueId, address: ValueId) -> ValueId {
        self.push_value(ValueKind::Store { value, address }, Type::Void)
    }

    pub fn index_addr(&mut self, base: ValueId, source: Type, indices: &[ValueId]) -> ValueId {
        self.push_value(
            ValueKind::IndexAddr {
                base,
                source,
                indices: SmallVec::from_slice(indices),
            },
            Type::Ptr,
        )
    }

    pub fn cast(&mut self, op: CastOp, source: ValueId, ty: Type) -> ValueId {
        self.push_value(ValueKind::Cast { op, source }, ty)
    }

    pub fn binary(&mut self, op: BinOp, lhs: ValueId, rhs: ValueId) -> ValueId {
        let ty = self.program.values[lhs.index()].ty.clone();
        self.push_value(ValueKind::Binary { op, lhs, rhs }, ty)
    }

    pub fn compare(&mut self, predicate: Predicate, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.push_value(ValueKind::Compare { predicate, lhs, rhs }, Type::I1)
    }

    pub fn br(&mut self, target: BlockId) -> ValueId {
        self.push_value(ValueKind::Branch { target }, Type::Void)
    }

    pub fn cond_br(&mut self, condition: ValueId, if_true: BlockId, if_false: BlockId) -> ValueId {
        self.push_value(
            ValueKind::CondBranch {
                condition,
                if_true,
                if_false,
            },
            Type::Void,
        )
    }

    /// Direct call to `callee`.
    pub fn call(&mut self, callee: impl Into<String>, args: &[ValueId], ty: Type) -> ValueId {
        self.push_value(
            ValueKind::Call {
                callee: Some(callee.into()),
                args: SmallVec::from_slice(args),
            },
            ty,
        )
    }

    /// Call through a function pointer.
    pub fn call_indirect(&mut self, args: &[ValueId], ty: Type) -> ValueId {
        self.push_value(
            ValueKind::Call {
                callee: None,
                args: SmallVec::from_slice(args),
            },
            ty,
        )
    }

    pub fn phi(&mut self, ty: Type, incoming: &[(ValueId, BlockId)]) -> ValueId {
        self.push_value(
            ValueKind::Phi {
                incoming: SmallVec::from_slice(incoming),
            },
            ty,
        )
    }

    /// Add an incoming edge to a phi created before its back-edge value existed.
    pub fn add_incoming(&mut self, phi: ValueId, value: ValueId, block: BlockId) {
        if let ValueKind::Phi { incoming } = &mut self.program.values[phi.index()].kind {
            incoming.push((value, block));
        }
    }

    pub fn select(&mut self, condition: ValueId, if_true: ValueId, if_false: ValueId) -> ValueId {
        let ty = self.program.values[if_true.index()].ty.clone();
        self.push_value(
            ValueKind::Select {
                condition,
                if_true,
                if_false,
            },
            ty,
        )
    }

    pub fn ret(&mut self, value: Option<ValueId>) -> ValueId {
        self.push_value(ValueKind::Return { value }, Type::Void)
    }

    /// Validate the program and build its use lists.
    pub fn finish(self) -> Result<Program, DigError> {
        let mut program = self.program;
        program.validate()?;
        program.rebuild_users();
        Ok(program)
    }
}
