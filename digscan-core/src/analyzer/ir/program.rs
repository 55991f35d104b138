//! Program arena and queries.
//!
//! [`Program`] owns every value, block and function. Users of each value are
//! derived once after construction or loading and kept in a side table, so the
//! analysis can walk def-use chains in both directions.

use crate::analyzer::error::{DigError, ProgramLocation};
use crate::analyzer::ir::instruction::{
    BasicBlock, BlockId, FuncId, Function, Type, Value, ValueId, ValueKind,
};
use bitvec::prelude::*;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::path::Path;

/// A whole program in SSA form.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Program {
    pub(crate) functions: Vec<Function>,
    pub(crate) blocks: Vec<BasicBlock>,
    pub(crate) values: Vec<Value>,
    #[serde(skip)]
    users: Vec<SmallVec<[ValueId; 4]>>,
}

impl Program {
    /// Load a serialized program and validate it.
    ///
    /// # Arguments
    /// * `json` - Program serialized with [`Program::to_json`]
    ///
    /// # Returns
    /// `Result<Program, DigError>` - Validated program with use lists built
    pub fn from_json(json: &str) -> Result<Self, DigError> {
        let mut program: Program = serde_json::from_str(json)?;
        program.validate()?;
        program.rebuild_users();
        log::debug!(
            "Loaded program: {} functions, {} blocks, {} values",
            program.functions.len(),
            program.blocks.len(),
            program.values.len()
        );
        Ok(program)
    }

    pub fn from_file(path: &Path) -> Result<Self, DigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String, DigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check that every reference in the program points at something that exists.
    pub fn validate(&self) -> Result<(), DigError> {
        let count = self.values.len();
        for (index, value) in self.values.iter().enumerate() {
            let location = ProgramLocation::new(value.function.map(|f| f.0), Some(index as u32));
            for operand in value.kind.operands() {
                if operand.index() >= count {
                    return Err(DigError::invalid_operand(location, operand.0, count));
                }
            }
            for block in value.kind.block_operands() {
                if block.index() >= self.blocks.len() {
                    return Err(DigError::invalid_block(location, block.0));
                }
            }
            if value.kind.is_instruction() {
                let (Some(function), Some(block)) = (value.function, value.block) else {
                    return Err(DigError::inconsistent(location, "instruction outside any block"));
                };
                let Some(owner) = self.blocks.get(block.index()) else {
                    return Err(DigError::invalid_block(location, block.0));
                };
                if owner.function != function {
                    return Err(DigError::inconsistent(
                        location,
                        "instruction and its block belong to different functions",
                    ));
                }
            }
        }
        for (index, function) in self.functions.iter().enumerate() {
            let location = ProgramLocation::new(Some(index as u32), None);
            for &block in &function.blocks {
                match self.blocks.get(block.index()) {
                    Some(b) if b.function.index() == index => {}
                    Some(_) => {
                        return Err(DigError::inconsistent(
                            location,
                            format!("block #{} is listed by a function that does not own it", block.0),
                        ))
                    }
                    None => return Err(DigError::invalid_block(location, block.0)),
                }
            }
            for &param in &function.params {
                if param.index() >= count {
                    return Err(DigError::invalid_operand(location, param.0, count));
                }
            }
        }
        for (index, block) in self.blocks.iter().enumerate() {
            for &inst in &block.instructions {
                let location = ProgramLocation::new(Some(block.function.0), Some(inst.0));
                match self.values.get(inst.index()) {
                    Some(v) if v.block == Some(BlockId(index as u32)) => {}
                    Some(_) => {
                        return Err(DigError::inconsistent(location, "instruction listed in a foreign block"))
                    }
                    None => return Err(DigError::invalid_operand(location, inst.0, count)),
                }
            }
        }
        self.check_cast_chains()
    }

    /// Reject casts that convert themselves, directly or through other casts.
    fn check_cast_chains(&self) -> Result<(), DigError> {
        let count = self.values.len();
        let mut acyclic = bitvec![0; count];
        for start in 0..count {
            if acyclic[start] {
                continue;
            }
            let mut path: SmallVec<[usize; 8]> = SmallVec::new();
            let mut current = start;
            while let ValueKind::Cast { source, .. } = &self.values[current].kind {
                if acyclic[current] {
                    break;
                }
                if path.len() > count {
                    let value = &self.values[start];
                    let location = ProgramLocation::new(value.function.map(|f| f.0), Some(start as u32));
                    return Err(DigError::inconsistent(location, "cast chain converts its own result"));
                }
                path.push(current);
                current = source.index();
            }
            for index in path {
                acyclic.set(index, true);
            }
            acyclic.set(start, true);
        }
        Ok(())
    }

    /// Recompute the users of every value.
    pub(crate) fn rebuild_users(&mut self) {
        let mut users: Vec<SmallVec<[ValueId; 4]>> = vec![SmallVec::new(); self.values.len()];
        for function in &self.functions {
            for &block in &function.blocks {
                for &inst in &self.blocks[block.index()].instructions {
                    for operand in self.values[inst.index()].kind.operands() {
                        let list = &mut users[operand.index()];
                        if !list.contains(&inst) {
                            list.push(inst);
                        }
                    }
                }
            }
        }
        self.users = users;
    }

    #[inline]
    pub fn functions(&self) -> &[Function] {
        &self.functions
    }

    /// Function identifiers in declaration order.
    pub fn function_ids(&self) -> impl Iterator<Item = FuncId> + '_ {
        (0..self.functions.len() as u32).map(FuncId)
    }

    #[inline]
    pub fn function(&self, id: FuncId) -> &Function {
        &self.functions[id.index()]
    }

    /// Defined (non-declaration) function with the given name.
    pub fn function_by_name(&self, name: &str) -> Option<FuncId> {
        self.functions
            .iter()
            .position(|f| f.name == name && !f.is_declaration())
            .map(|i| FuncId(i as u32))
    }

    #[inline]
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.index()]
    }

    #[inline]
    pub fn value(&self, id: ValueId) -> &Value {
        &self.values[id.index()]
    }

    #[inline]
    pub fn kind(&self, id: ValueId) -> &ValueKind {
        &self.values[id.index()].kind
    }

    #[inline]
    pub fn ty(&self, id: ValueId) -> &Type {
        &self.values[id.index()].ty
    }

    #[inline]
    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    /// Instructions using `id` as an operand, in program order.
    #[inline]
    pub fn users(&self, id: ValueId) -> &[ValueId] {
        self.users.get(id.index()).map(|u| u.as_slice()).unwrap_or(&[])
    }

    /// Function containing the instruction or argument `id`.
    #[inline]
    pub fn function_of(&self, id: ValueId) -> Option<FuncId> {
        self.values[id.index()].function
    }

    /// Instructions of a function in block order.
    pub fn instructions(&self, function: FuncId) -> impl Iterator<Item = ValueId> + '_ {
        self.functions[function.index()]
            .blocks
            .iter()
            .flat_map(move |b| self.blocks[b.index()].instructions.iter().copied())
    }

    /// Instructions of every defined function in declaration order.
    pub fn all_instructions(&self) -> impl Iterator<Item = ValueId> + '_ {
        self.function_ids().flat_map(move |f| self.instructions(f))
    }

    pub fn instruction_count(&self, function: FuncId) -> usize {
        self.functions[function.index()]
            .blocks
            .iter()
            .map(|b| self.blocks[b.index()].instructions.len())
            .sum()
    }

    /// Integer value of a constant.
    #[inline]
    pub fn const_value(&self, id: ValueId) -> Option<i64> {
        match self.kind(id) {
            ValueKind::ConstInt { value } => Some(*value),
            _ => None,
        }
    }

    /// Name of the directly called function.
    pub fn callee(&self, id: ValueId) -> Option<&str> {
        match self.kind(id) {
            ValueKind::Call {
                callee: Some(name), ..
            } => Some(name.as_str()),
            _ => None,
        }
    }

    /// Human readable name used in reports.
    pub fn display_name(&self, id: ValueId) -> String {
        match (&self.values[id.index()].name, &self.values[id.index()].kind) {
            (Some(name), _) => format!("%{}", name),
            (None, ValueKind::Global { name }) => format!("@{}", name),
            _ => id.to_string(),
        }
    }

    /// Follow casts back to the value they convert.
    pub fn strip_casts(&self, mut id: ValueId) -> ValueId {
        for _ in 0..self.values.len() {
            match self.kind(id) {
                ValueKind::Cast { source, .. } if *source != id => id = *source,
                _ => break,
            }
        }
        id
    }

    /// Follow integer width changes (sext/zext/trunc) back to their source.
    pub fn strip_int_resizes(&self, mut id: ValueId) -> ValueId {
        for _ in 0..self.values.len() {
            match self.kind(id) {
                ValueKind::Cast { op, source } if op.is_int_resize() && *source != id => id = *source,
                _ => break,
            }
        }
        id
    }
}
