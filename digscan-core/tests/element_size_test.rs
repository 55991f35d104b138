// Integration tests for element-size inference
mod common;

#[cfg(test)]
mod tests {
    use super::common;
    use digscan_core::analyzer::analysis::{AllocationRegistry, AnalysisContext, ElementSizeInference};
    use digscan_core::analyzer::config::AnalysisConfig;
    use digscan_core::analyzer::dig::{AllocationNode, ElementCount, StrideSource};
    use digscan_core::analyzer::ir::{BinOp, CastOp, Predicate, Program, ProgramBuilder, Type};

    fn nodes(program: &Program) -> Vec<AllocationNode> {
        let config = AnalysisConfig::default();
        let mut ctx = AnalysisContext::new(program, &config);
        AllocationRegistry::scan(&mut ctx);
        ctx.nodes
    }

    fn only_node(program: &Program) -> AllocationNode {
        let mut all = nodes(program);
        assert_eq!(all.len(), 1);
        all.remove(0)
    }

    #[test]
    fn test_count_times_sizeof_binds_direct_argument() {
        let mut b = ProgramBuilder::new();
        b.begin_function("main", &[Type::I64], Type::Void);
        let n = b.param(0).expect("param 0");
        let entry = b.block("entry");
        b.position_at(entry);
        let four = b.const_i64(4);
        let size = b.binary(BinOp::Mul, n, four);
        let p = b.call("malloc", &[size], Type::Ptr);
        // Wider accesses must not override the size argument.
        for k in 0..3 {
            let offset = b.const_i64(k);
            let g = b.index_addr(p, Type::I64, &[offset]);
            b.load(Type::I64, g);
        }
        b.ret(None);
        let program = b.finish().expect("valid program");

        let node = only_node(&program);
        assert_eq!(node.element_stride, 4);
        assert_eq!(node.stride_source, StrideSource::DirectArgument);
        assert_eq!(node.element_count, ElementCount::Runtime(n));
    }

    #[test]
    fn test_sizeof_times_constant_count() {
        let (program, _) = common::single_allocation("malloc", |b, _| {
            let eight = b.const_i64(8);
            let count = b.const_i64(25);
            vec![b.binary(BinOp::Mul, eight, count)]
        });
        let node = only_node(&program);
        // 25 is not a plausible size, so the left-hand constant binds.
        assert_eq!(node.element_stride, 8);
        assert_eq!(node.element_count, ElementCount::Constant(25));
    }

    #[test]
    fn test_shift_binds_power_of_two() {
        let (program, _) = common::single_allocation("malloc", |b, n| {
            let three = b.const_i64(3);
            vec![b.binary(BinOp::Shl, n, three)]
        });
        let node = only_node(&program);
        assert_eq!(node.element_stride, 8);
        assert_eq!(node.stride_source, StrideSource::DirectArgument);
    }

    #[test]
    fn test_implausible_factor_falls_back_to_bytes() {
        let (program, _) = common::single_allocation("malloc", |b, n| {
            let seven = b.const_i64(7);
            vec![b.binary(BinOp::Mul, n, seven)]
        });
        let node = only_node(&program);
        assert_eq!(node.element_stride, 1);
        assert_eq!(node.stride_source, StrideSource::Default);
        assert!(matches!(node.element_count, ElementCount::Runtime(_)));
    }

    #[test]
    fn test_calloc_binds_explicit_arguments() {
        let (program, _) = common::single_allocation("calloc", |b, n| {
            let size = b.const_i64(8);
            vec![n, size]
        });
        let node = only_node(&program);
        assert_eq!(node.element_stride, 8);
        assert_eq!(node.stride_source, StrideSource::ExplicitArguments);

        let (program, _) = common::single_allocation("calloc", |b, _| {
            let count = b.const_i64(10);
            let size = b.const_i64(12);
            vec![count, size]
        });
        let node = only_node(&program);
        assert_eq!(node.element_stride, 12);
        assert_eq!(node.element_count, ElementCount::Constant(10));
    }

    #[test]
    fn test_zero_element_size_falls_through() {
        let (program, _) = common::single_allocation("calloc", |b, n| {
            let size = b.const_i64(0);
            vec![n, size]
        });
        let node = only_node(&program);
        assert_eq!(node.element_stride, 1);
        assert_eq!(node.stride_source, StrideSource::Default);
    }

    #[test]
    fn test_realloc_reads_second_argument() {
        let (program, _) = common::single_allocation("realloc", |b, n| {
            let old = b.const_i64(0);
            let sixteen = b.const_i64(16);
            let size = b.binary(BinOp::Mul, n, sixteen);
            vec![old, size]
        });
        let node = only_node(&program);
        assert_eq!(node.element_stride, 16);
        assert_eq!(node.stride_source, StrideSource::DirectArgument);
    }

    #[test]
    fn test_small_object_allocation() {
        let (program, _) = common::single_allocation("_Znwm", |b, _| vec![b.const_i64(24)]);
        let node = only_node(&program);
        assert_eq!(node.element_stride, 24);
        assert_eq!(node.element_count, ElementCount::Constant(1));
        assert_eq!(node.stride_source, StrideSource::SingleObject);

        let (program, _) = common::single_allocation("_Znwm", |b, _| vec![b.const_i64(1000)]);
        let node = only_node(&program);
        assert_eq!(node.stride_source, StrideSource::Default);
        assert_eq!(node.element_count, ElementCount::Constant(1000));
    }

    #[test]
    fn test_array_new_unwraps_overflow_select() {
        let mut count_arg = None;
        let (program, _) = common::single_allocation("_Znam", |b, n| {
            count_arg = Some(n);
            let eight = b.const_i64(8);
            let bytes = b.binary(BinOp::Mul, n, eight);
            let limit = b.const_i64(1 << 40);
            let overflow = b.compare(Predicate::Ugt, n, limit);
            let minus_one = b.const_i64(-1);
            vec![b.select(overflow, minus_one, bytes)]
        });
        let node = only_node(&program);
        assert_eq!(node.element_stride, 8);
        assert_eq!(node.element_count, ElementCount::Runtime(count_arg.expect("count argument")));
    }

    #[test]
    fn test_usage_majority_on_constant_size() {
        let mut b = ProgramBuilder::new();
        b.begin_function("main", &[], Type::Void);
        let entry = b.block("entry");
        b.position_at(entry);
        let size = b.const_i64(400);
        let p = b.call("malloc", &[size], Type::Ptr);
        for k in 0..100 {
            let offset = b.const_i64(k);
            let g = b.index_addr(p, Type::I32, &[offset]);
            let value = b.const_i32(k);
            b.store(value, g);
        }
        b.ret(None);
        let program = b.finish().expect("valid program");

        let node = only_node(&program);
        assert_eq!(node.element_stride, 4);
        assert_eq!(node.element_count, ElementCount::Constant(100));
        assert_eq!(node.stride_source, StrideSource::UsageMajority);
    }

    #[test]
    fn test_usage_tally_follows_casts() {
        let mut b = ProgramBuilder::new();
        b.begin_function("main", &[], Type::Void);
        let entry = b.block("entry");
        b.position_at(entry);
        let size = b.const_i64(64);
        let p = b.call("malloc", &[size], Type::Ptr);
        let q = b.cast(CastOp::BitCast, p, Type::Ptr);
        let zero = b.const_i64(0);
        let one = b.const_i64(1);
        let g0 = b.index_addr(q, Type::F64, &[zero]);
        b.load(Type::F64, g0);
        let g1 = b.index_addr(q, Type::F64, &[one]);
        b.load(Type::F64, g1);
        b.ret(None);
        let program = b.finish().expect("valid program");

        let usage = ElementSizeInference::summarize_usage(&program, p);
        assert_eq!(usage.access_widths.get(&8), Some(&2));
        assert_eq!(usage.indexed.len(), 2);

        let node = only_node(&program);
        assert_eq!(node.element_stride, 8);
        assert_eq!(node.element_count, ElementCount::Constant(8));
    }

    #[test]
    fn test_common_byte_offset_difference() {
        let mut b = ProgramBuilder::new();
        b.begin_function("main", &[], Type::Void);
        let entry = b.block("entry");
        b.position_at(entry);
        let size = b.const_i64(64);
        let p = b.call("malloc", &[size], Type::Ptr);
        // Equal numbers of 4- and 8-byte accesses leave no dominant width.
        for (offset, ty) in [(0, Type::I32), (8, Type::I64), (16, Type::I32), (24, Type::I64)] {
            let c = b.const_i64(offset);
            let g = b.index_addr(p, Type::I8, &[c]);
            b.load(ty, g);
        }
        b.ret(None);
        let program = b.finish().expect("valid program");

        let node = only_node(&program);
        assert_eq!(node.element_stride, 8);
        assert_eq!(node.element_count, ElementCount::Constant(8));
        assert_eq!(node.stride_source, StrideSource::IndexStride);
    }

    #[test]
    fn test_induction_step_binds_stride() {
        let mut b = ProgramBuilder::new();
        b.begin_function("main", &[Type::I64], Type::Void);
        let n = b.param(0).expect("param 0");
        let entry = b.block("entry");
        let body = b.block("loop");
        let exit = b.block("exit");
        b.position_at(entry);
        let p = b.call("malloc", &[n], Type::Ptr);
        let zero = b.const_i64(0);
        b.br(body);

        b.position_at(body);
        let i = b.phi(Type::I64, &[(zero, entry)]);
        let sixteen = b.const_i64(16);
        let offset = b.binary(BinOp::Mul, i, sixteen);
        let g = b.index_addr(p, Type::I8, &[offset]);
        b.load(Type::I64, g);
        let one = b.const_i64(1);
        let next = b.binary(BinOp::Add, i, one);
        b.add_incoming(i, next, body);
        let more = b.compare(Predicate::Slt, next, n);
        b.cond_br(more, body, exit);

        b.position_at(exit);
        b.ret(None);
        let program = b.finish().expect("valid program");

        assert_eq!(ElementSizeInference::induction_step(&program, offset, 0), Some(16));
        let node = only_node(&program);
        assert_eq!(node.element_stride, 16);
        assert_eq!(node.stride_source, StrideSource::AffineStep);
        assert_eq!(node.element_count, ElementCount::Unknown);
    }

    #[test]
    fn test_overflowing_induction_step_is_ignored() {
        let mut b = ProgramBuilder::new();
        b.begin_function("main", &[Type::I64], Type::Void);
        let n = b.param(0).expect("param 0");
        let entry = b.block("entry");
        let body = b.block("loop");
        let exit = b.block("exit");
        b.position_at(entry);
        let p = b.call("malloc", &[n], Type::Ptr);
        let zero = b.const_i64(0);
        b.br(body);

        b.position_at(body);
        let i = b.phi(Type::I64, &[(zero, entry)]);
        let huge = b.const_i64(1 << 40);
        let scaled = b.binary(BinOp::Mul, i, huge);
        let g = b.index_addr(p, Type::I8, &[scaled]);
        b.load(Type::I64, g);
        let shift = b.const_i64(62);
        let shifted = b.binary(BinOp::Shl, i, shift);
        let g2 = b.index_addr(p, Type::I8, &[shifted]);
        b.load(Type::I64, g2);
        let next = b.binary(BinOp::Add, i, huge);
        b.add_incoming(i, next, body);
        let more = b.compare(Predicate::Slt, next, n);
        b.cond_br(more, body, exit);

        b.position_at(exit);
        b.ret(None);
        let program = b.finish().expect("valid program");

        assert_eq!(ElementSizeInference::induction_step(&program, i, 0), Some(1 << 40));
        assert_eq!(ElementSizeInference::induction_step(&program, scaled, 0), None);
        assert_eq!(ElementSizeInference::induction_step(&program, shifted, 0), None);
        let node = only_node(&program);
        assert_eq!(node.element_stride, 1);
        assert_eq!(node.stride_source, StrideSource::Default);
    }

    #[test]
    fn test_default_strides_counted() {
        let (program, _) = common::single_allocation("malloc", |_, n| vec![n]);
        let config = AnalysisConfig::default();
        let mut ctx = AnalysisContext::new(&program, &config);
        AllocationRegistry::scan(&mut ctx);
        assert_eq!(ctx.diagnostics.default_strides, 1);
        assert_eq!(ctx.nodes[0].element_stride, 1);
    }

    #[test]
    fn test_every_node_has_positive_stride() {
        let fixture = common::csr_traversal();
        for node in nodes(&fixture.program) {
            assert!(node.element_stride > 0);
            assert_ne!(node.stride_source, StrideSource::Pending);
        }
    }
}
