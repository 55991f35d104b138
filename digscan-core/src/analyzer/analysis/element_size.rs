//! Element-Size Inference
//!
//! Binds the element stride and count of an allocation node.
//!
//! # Algorithm
//! A cascade of independent strategies, each tried once, first success wins:
//! 1. **Direct argument**: size argument is `count * c` or `count << k` with a
//!    plausible element size; small constant object allocations are single objects
//! 2. **Explicit arguments**: count and element size passed separately
//! 3. **Usage majority**: one access width dominates the allocation's users
//!    and divides its known total size
//! 4. **Index stride**: constant byte offsets into the allocation share a common difference
//! 5. **Affine step**: an induction variable indexes the allocation with a multi-byte step
//! 6. **Default**: byte array sized by the size argument
//!
//! A strategy yielding a zero stride counts as failed.

use crate::analyzer::config::{AllocatorKind, AnalysisConfig};
use crate::analyzer::dig::{AllocationNode, ElementCount, StrideSource};
use crate::analyzer::ir::{BinOp, Program, Type, ValueId, ValueKind};
use bitvec::prelude::*;
use smallvec::SmallVec;
use std::collections::{BTreeMap, VecDeque};

/// Result of a successful strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inference {
    pub stride: u64,
    pub count: ElementCount,
    pub source: StrideSource,
}

/// Memory accesses reachable from an allocation result.
#[derive(Debug, Default)]
pub struct UsageSummary {
    /// Loaded or stored widths in bytes with their occurrence counts
    pub access_widths: BTreeMap<u64, usize>,
    /// Indexed addresses with the allocation (or a derived pointer) as base
    pub indexed: SmallVec<[ValueId; 8]>,
}

/// Everything the strategies may look at.
struct InferenceInput<'a> {
    program: &'a Program,
    config: &'a AnalysisConfig,
    kind: AllocatorKind,
    args: &'a [ValueId],
    usage: UsageSummary,
}

impl InferenceInput<'_> {
    /// Total size argument, with `select(c, -1, n)` unwrapped for object allocations.
    fn size_argument(&self) -> Option<ValueId> {
        let size = *self.args.get(self.kind.size_argument()?)?;
        if self.kind != AllocatorKind::ObjectConstructing {
            return Some(size);
        }
        match self.program.kind(size) {
            ValueKind::Select {
                if_true, if_false, ..
            } => {
                if self.program.const_value(*if_true) == Some(-1) {
                    Some(*if_false)
                } else if self.program.const_value(*if_false) == Some(-1) {
                    Some(*if_true)
                } else {
                    Some(size)
                }
            }
            _ => Some(size),
        }
    }

    /// Total allocation size in bytes when it is a compile-time constant.
    fn total_bytes(&self) -> Option<u64> {
        match self.kind {
            AllocatorKind::ZeroInitializing => {
                let count = self.program.const_value(*self.args.first()?)?;
                let size = self.program.const_value(*self.args.get(1)?)?;
                u64::try_from(count.checked_mul(size)?).ok()
            }
            _ => u64::try_from(self.program.const_value(self.size_argument()?)?).ok(),
        }
    }

    fn count_of(&self, value: ValueId) -> ElementCount {
        match self.program.const_value(value) {
            Some(c) if c >= 0 => ElementCount::Constant(c as u64),
            _ => ElementCount::Runtime(value),
        }
    }

    fn count_for_stride(&self, stride: u64) -> ElementCount {
        match self.total_bytes() {
            Some(total) => ElementCount::Constant(total / stride),
            None => ElementCount::Unknown,
        }
    }
}

type Strategy = fn(&InferenceInput<'_>) -> Option<Inference>;

pub struct ElementSizeInference;

impl ElementSizeInference {
    /// Populate `node.element_stride`, `node.element_count` and `node.stride_source`.
    ///
    /// # Arguments
    /// * `program` - Program containing the allocation call
    /// * `config` - Plausibility bounds and allocator table
    /// * `node` - Node whose `site` is the allocation call
    pub fn infer(program: &Program, config: &AnalysisConfig, node: &mut AllocationNode) {
        let args: &[ValueId] = match program.kind(node.site) {
            ValueKind::Call { args, .. } => args.as_slice(),
            _ => &[],
        };
        let input = InferenceInput {
            program,
            config,
            kind: node.allocator,
            args,
            usage: Self::summarize_usage(program, node.site),
        };

        const CASCADE: [Strategy; 5] = [
            ElementSizeInference::direct_argument,
            ElementSizeInference::explicit_arguments,
            ElementSizeInference::usage_majority,
            ElementSizeInference::index_stride,
            ElementSizeInference::affine_step,
        ];

        let inference = CASCADE
            .iter()
            .filter_map(|strategy| strategy(&input))
            .find(|inference| inference.stride > 0 && i64::try_from(inference.stride).is_ok())
            .unwrap_or_else(|| Self::default_inference(&input));

        if inference.source == StrideSource::Default {
            log::warn!(
                "No element size found for {}, treating it as a byte array",
                program.display_name(node.site)
            );
        }

        node.element_stride = i64::try_from(inference.stride).unwrap_or(1);
        node.element_count = inference.count;
        node.stride_source = inference.source;
    }

    /// Breadth-first walk from `site` through address arithmetic, casts and
    /// pointer merges, tallying the width of every load and store reached.
    pub fn summarize_usage(program: &Program, site: ValueId) -> UsageSummary {
        let mut summary = UsageSummary::default();
        let mut visited = bitvec![0; program.value_count()];
        let mut queue = VecDeque::new();
        visited.set(site.index(), true);
        queue.push_back(site);

        while let Some(current) = queue.pop_front() {
            for &user in program.users(current) {
                match program.kind(user) {
                    ValueKind::Load { address } if *address == current => {
                        *summary
                            .access_widths
                            .entry(program.ty(user).store_size())
                            .or_insert(0) += 1;
                    }
                    ValueKind::Store { value, address } if *address == current => {
                        *summary
                            .access_widths
                            .entry(program.ty(*value).store_size())
                            .or_insert(0) += 1;
                    }
                    ValueKind::IndexAddr { base, .. } if *base == current => {
                        summary.indexed.push(user);
                        if !visited[user.index()] {
                            visited.set(user.index(), true);
                            queue.push_back(user);
                        }
                    }
                    ValueKind::Cast { .. } | ValueKind::Phi { .. } | ValueKind::Select { .. } => {
                        if !visited[user.index()] {
                            visited.set(user.index(), true);
                            queue.push_back(user);
                        }
                    }
                    _ => {}
                }
            }
        }
        summary.access_widths.remove(&0);
        summary
    }

    fn direct_argument(input: &InferenceInput<'_>) -> Option<Inference> {
        let size = input.size_argument()?;
        let program = input.program;

        // (element size, count) candidates, right-hand constant first
        let mut scaled: SmallVec<[(u64, ValueId); 2]> = SmallVec::new();
        match program.kind(size) {
            ValueKind::Binary {
                op: BinOp::Mul,
                lhs,
                rhs,
            } => {
                if let Some(c) = program.const_value(*rhs).filter(|c| *c > 0) {
                    scaled.push((c as u64, *lhs));
                }
                if let Some(c) = program.const_value(*lhs).filter(|c| *c > 0) {
                    scaled.push((c as u64, *rhs));
                }
            }
            ValueKind::Binary {
                op: BinOp::Shl,
                lhs,
                rhs,
            } => {
                if let Some(k) = program.const_value(*rhs).filter(|k| (0..63).contains(k)) {
                    scaled.push((1u64 << k, *lhs));
                }
            }
            _ => {}
        }

        if let Some(&(stride, count)) = scaled
            .iter()
            .find(|(stride, _)| input.config.is_plausible_element_size(*stride))
        {
            return Some(Inference {
                stride,
                count: input.count_of(count),
                source: StrideSource::DirectArgument,
            });
        }

        if input.kind == AllocatorKind::ObjectConstructing {
            let bytes = program.const_value(size)?;
            if bytes > 0 && bytes % 8 == 0 && bytes <= 256 {
                return Some(Inference {
                    stride: bytes as u64,
                    count: ElementCount::Constant(1),
                    source: StrideSource::SingleObject,
                });
            }
        }
        None
    }

    fn explicit_arguments(input: &InferenceInput<'_>) -> Option<Inference> {
        if input.kind != AllocatorKind::ZeroInitializing {
            return None;
        }
        let count = *input.args.first()?;
        let size = input.program.const_value(*input.args.get(1)?)?;
        if size <= 0 {
            return None;
        }
        Some(Inference {
            stride: size as u64,
            count: input.count_of(count),
            source: StrideSource::ExplicitArguments,
        })
    }

    fn usage_majority(input: &InferenceInput<'_>) -> Option<Inference> {
        let total = input.total_bytes()?;
        let best = *input.usage.access_widths.values().max()?;
        if best < 2 {
            return None;
        }
        let mut dominant = input
            .usage
            .access_widths
            .iter()
            .filter(|(_, count)| **count == best);
        let (&width, _) = dominant.next()?;
        if dominant.next().is_some() || width == 0 || total < width || total % width != 0 {
            return None;
        }
        Some(Inference {
            stride: width,
            count: ElementCount::Constant(total / width),
            source: StrideSource::UsageMajority,
        })
    }

    fn index_stride(input: &InferenceInput<'_>) -> Option<Inference> {
        let program = input.program;
        let mut offsets: Vec<i64> = input
            .usage
            .indexed
            .iter()
            .filter_map(|&addr| match program.kind(addr) {
                ValueKind::IndexAddr {
                    source: Type::I8,
                    indices,
                    ..
                } if indices.len() == 1 => program.const_value(indices[0]),
                _ => None,
            })
            .collect();
        offsets.sort_unstable();
        offsets.dedup();
        if offsets.len() < 3 {
            return None;
        }

        let mut differences: BTreeMap<u64, usize> = BTreeMap::new();
        for pair in offsets.windows(2) {
            let diff = pair[1].abs_diff(pair[0]);
            if diff > 0 && diff <= input.config.max_index_stride {
                *differences.entry(diff).or_insert(0) += 1;
            }
        }
        let pairs = offsets.len() - 1;
        // Ties go to the smaller stride.
        let (&stride, &count) = differences
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))?;
        if count < 2 || count * 2 <= pairs {
            return None;
        }
        Some(Inference {
            stride,
            count: input.count_for_stride(stride),
            source: StrideSource::IndexStride,
        })
    }

    fn affine_step(input: &InferenceInput<'_>) -> Option<Inference> {
        let program = input.program;
        let mut steps: BTreeMap<u64, usize> = BTreeMap::new();
        for &addr in &input.usage.indexed {
            let ValueKind::IndexAddr { source, indices, .. } = program.kind(addr) else {
                continue;
            };
            if indices.len() != 1 {
                continue;
            }
            let bytes = Self::induction_step(program, indices[0], 0)
                .and_then(|step| step.checked_mul(source.store_size().max(1)));
            if let Some(bytes) = bytes {
                if bytes > 1 && i64::try_from(bytes).is_ok() {
                    *steps.entry(bytes).or_insert(0) += 1;
                }
            }
        }
        let (&stride, _) = steps
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))?;
        Some(Inference {
            stride,
            count: input.count_for_stride(stride),
            source: StrideSource::AffineStep,
        })
    }

    /// Step of `index` per loop iteration when it is an affine function of a phi induction variable.
    pub fn induction_step(program: &Program, index: ValueId, depth: usize) -> Option<u64> {
        if depth > 8 {
            return None;
        }
        let index = program.strip_int_resizes(index);
        match program.kind(index) {
            ValueKind::Phi { incoming } => incoming.iter().find_map(|(arm, _)| {
                let arm = program.strip_int_resizes(*arm);
                match program.kind(arm) {
                    ValueKind::Binary {
                        op: BinOp::Add,
                        lhs,
                        rhs,
                    } => {
                        let (var, step) = if program.strip_int_resizes(*lhs) == index {
                            (*lhs, program.const_value(*rhs))
                        } else {
                            (*rhs, program.const_value(*lhs))
                        };
                        match step {
                            Some(s) if s != 0 && program.strip_int_resizes(var) == index => {
                                Some(s.unsigned_abs())
                            }
                            _ => None,
                        }
                    }
                    _ => None,
                }
            }),
            ValueKind::Binary { op, lhs, rhs } => {
                let (l, r) = (program.const_value(*lhs), program.const_value(*rhs));
                match (op, l, r) {
                    (BinOp::Mul, _, Some(k)) if k != 0 => {
                        Self::induction_step(program, *lhs, depth + 1).and_then(|s| s.checked_mul(k.unsigned_abs()))
                    }
                    (BinOp::Mul, Some(k), _) if k != 0 => {
                        Self::induction_step(program, *rhs, depth + 1).and_then(|s| s.checked_mul(k.unsigned_abs()))
                    }
                    (BinOp::Shl, _, Some(k)) if (0..63).contains(&k) => {
                        Self::induction_step(program, *lhs, depth + 1).and_then(|s| s.checked_mul(1u64 << k))
                    }
                    (BinOp::Add | BinOp::Sub, _, Some(_)) => {
                        Self::induction_step(program, *lhs, depth + 1)
                    }
                    (BinOp::Add, Some(_), _) => Self::induction_step(program, *rhs, depth + 1),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    fn default_inference(input: &InferenceInput<'_>) -> Inference {
        let count = match (input.size_argument(), input.total_bytes()) {
            (_, Some(total)) => ElementCount::Constant(total),
            (Some(size), None) => ElementCount::Runtime(size),
            (None, None) => ElementCount::Unknown,
        };
        Inference {
            stride: 1,
            count,
            source: StrideSource::Default,
        }
    }
}
