//! Test Utilities
//!
//! Program fixtures for the integration tests. Each builder returns the
//! finished program together with the handles the tests assert on.

#![allow(dead_code)]

use digscan_core::analyzer::ir::{BinOp, CastOp, Predicate, Program, ProgramBuilder, Type, ValueId};

pub fn holder_type() -> Type {
    Type::Struct {
        name: "Holder".to_string(),
        size: 16,
    }
}

pub fn graph_type() -> Type {
    Type::Struct {
        name: "Graph".to_string(),
        size: 16,
    }
}

/// Handles of the `sum += A[B[i]]` fixture.
pub struct IndexedLoop {
    pub program: Program,
    pub b: ValueId,
    pub a: ValueId,
}

/// `B = malloc(400); A = malloc(400); for i in 0..100 { sum += A[B[i]] }`
pub fn indexed_loop() -> IndexedLoop {
    let mut b = ProgramBuilder::new();
    b.begin_function("main", &[], Type::I32);
    let entry = b.block("entry");
    let body = b.block("loop");
    let exit = b.block("exit");

    b.position_at(entry);
    let size = b.const_i64(400);
    let arr_b = b.call("malloc", &[size], Type::Ptr);
    b.name(arr_b, "B");
    let arr_a = b.call("malloc", &[size], Type::Ptr);
    b.name(arr_a, "A");
    let zero = b.const_i64(0);
    b.br(body);

    b.position_at(body);
    let i = b.phi(Type::I64, &[(zero, entry)]);
    let gb = b.index_addr(arr_b, Type::I32, &[i]);
    let bi = b.load(Type::I32, gb);
    let idx = b.cast(CastOp::SExt, bi, Type::I64);
    let ga = b.index_addr(arr_a, Type::I32, &[idx]);
    let _av = b.load(Type::I32, ga);
    let one = b.const_i64(1);
    let next = b.binary(BinOp::Add, i, one);
    b.add_incoming(i, next, body);
    let hundred = b.const_i64(100);
    let cond = b.compare(Predicate::Slt, next, hundred);
    b.cond_br(cond, body, exit);

    b.position_at(exit);
    let ret = b.const_i32(0);
    b.ret(Some(ret));

    IndexedLoop {
        program: b.finish().expect("valid program"),
        b: arr_b,
        a: arr_a,
    }
}

/// Handles of the CSR traversal fixture.
pub struct CsrTraversal {
    pub program: Program,
    pub offset: ValueId,
    pub edges: ValueId,
    pub offset_size: ValueId,
}

/// CSR graph: `for v { for j in offset[v]..offset[v+1] { use(edges[j]) } }`
pub fn csr_traversal() -> CsrTraversal {
    let mut b = ProgramBuilder::new();
    b.begin_function("traverse", &[Type::I64, Type::I64], Type::Void);
    let num_vertices = b.param(0).expect("param 0");
    let num_edges = b.param(1).expect("param 1");
    let entry = b.block("entry");
    let vloop = b.block("vloop");
    let jhead = b.block("jhead");
    let jbody = b.block("jbody");
    let vlatch = b.block("vlatch");
    let exit = b.block("exit");

    b.position_at(entry);
    let one = b.const_i64(1);
    let four = b.const_i64(4);
    let vplus = b.binary(BinOp::Add, num_vertices, one);
    let offset_size = b.binary(BinOp::Mul, vplus, four);
    let offset = b.call("malloc", &[offset_size], Type::Ptr);
    b.name(offset, "offset");
    let edges_size = b.binary(BinOp::Mul, num_edges, four);
    let edges = b.call("malloc", &[edges_size], Type::Ptr);
    b.name(edges, "edges");
    let zero = b.const_i64(0);
    b.br(vloop);

    b.position_at(vloop);
    let v = b.phi(Type::I64, &[(zero, entry)]);
    let go = b.index_addr(offset, Type::I32, &[v]);
    let start = b.load(Type::I32, go);
    let start64 = b.cast(CastOp::SExt, start, Type::I64);
    let v1 = b.binary(BinOp::Add, v, one);
    let go1 = b.index_addr(offset, Type::I32, &[v1]);
    let end = b.load(Type::I32, go1);
    let end64 = b.cast(CastOp::SExt, end, Type::I64);
    b.br(jhead);

    b.position_at(jhead);
    let j = b.phi(Type::I64, &[(start64, vloop)]);
    let in_range = b.compare(Predicate::Slt, j, end64);
    b.cond_br(in_range, jbody, vlatch);

    b.position_at(jbody);
    let ge = b.index_addr(edges, Type::I32, &[j]);
    let _neighbor = b.load(Type::I32, ge);
    let j_next = b.binary(BinOp::Add, j, one);
    b.add_incoming(j, j_next, jbody);
    b.br(jhead);

    b.position_at(vlatch);
    let v_next = b.binary(BinOp::Add, v, one);
    b.add_incoming(v, v_next, vlatch);
    let more = b.compare(Predicate::Slt, v_next, num_vertices);
    b.cond_br(more, vloop, exit);

    b.position_at(exit);
    b.ret(None);

    CsrTraversal {
        program: b.finish().expect("valid program"),
        offset,
        edges,
        offset_size,
    }
}

/// Handles of the CSR fixture whose inner loop touches several arrays.
pub struct CsrRelax {
    pub program: Program,
    pub offset: ValueId,
    pub edges: ValueId,
    pub dist: ValueId,
    pub out: ValueId,
}

/// `for j in offset[v]..offset[v+1] { u = edges[j]; dist[u]; out[j] = 0 }`
pub fn csr_relax() -> CsrRelax {
    let mut b = ProgramBuilder::new();
    b.begin_function("relax", &[Type::I64, Type::I64], Type::Void);
    let v = b.param(0).expect("param 0");
    let n = b.param(1).expect("param 1");
    let entry = b.block("entry");
    let head = b.block("head");
    let body = b.block("body");
    let exit = b.block("exit");

    b.position_at(entry);
    let four = b.const_i64(4);
    let size = b.binary(BinOp::Mul, n, four);
    let mut arrays = Vec::new();
    for name in ["offset", "edges", "dist", "out"] {
        let array = b.call("malloc", &[size], Type::Ptr);
        b.name(array, name);
        arrays.push(array);
    }
    let (offset, edges, dist, out) = (arrays[0], arrays[1], arrays[2], arrays[3]);
    let one = b.const_i64(1);
    let g_start = b.index_addr(offset, Type::I32, &[v]);
    let start = b.load(Type::I32, g_start);
    let start64 = b.cast(CastOp::SExt, start, Type::I64);
    let v1 = b.binary(BinOp::Add, v, one);
    let g_end = b.index_addr(offset, Type::I32, &[v1]);
    let end = b.load(Type::I32, g_end);
    let end64 = b.cast(CastOp::SExt, end, Type::I64);
    b.br(head);

    b.position_at(head);
    let j = b.phi(Type::I64, &[(start64, entry)]);
    let in_range = b.compare(Predicate::Slt, j, end64);
    b.cond_br(in_range, body, exit);

    b.position_at(body);
    let g_edge = b.index_addr(edges, Type::I32, &[j]);
    let u = b.load(Type::I32, g_edge);
    let u64v = b.cast(CastOp::SExt, u, Type::I64);
    let g_dist = b.index_addr(dist, Type::I32, &[u64v]);
    let _d = b.load(Type::I32, g_dist);
    let g_out = b.index_addr(out, Type::I32, &[j]);
    let zero = b.const_i32(0);
    b.store(zero, g_out);
    let j_next = b.binary(BinOp::Add, j, one);
    b.add_incoming(j, j_next, body);
    b.br(head);

    b.position_at(exit);
    b.ret(None);

    CsrRelax {
        program: b.finish().expect("valid program"),
        offset,
        edges,
        dist,
        out,
    }
}

/// The same `A[B[i]]` loop written the way an unoptimized front end emits
/// it: every variable lives in a stack slot.
pub fn indexed_loop_in_slots() -> IndexedLoop {
    let mut b = ProgramBuilder::new();
    b.begin_function("main", &[], Type::I32);
    let entry = b.block("entry");
    let cond_block = b.block("for.cond");
    let body = b.block("for.body");
    let exit = b.block("for.end");

    b.position_at(entry);
    let a_slot = b.alloca(Type::Ptr);
    let b_slot = b.alloca(Type::Ptr);
    let i_slot = b.alloca(Type::I32);
    let size = b.const_i64(400);
    let arr_b = b.call("malloc", &[size], Type::Ptr);
    b.name(arr_b, "B");
    b.store(arr_b, b_slot);
    let arr_a = b.call("malloc", &[size], Type::Ptr);
    b.name(arr_a, "A");
    b.store(arr_a, a_slot);
    let zero = b.const_i32(0);
    b.store(zero, i_slot);
    b.br(cond_block);

    b.position_at(cond_block);
    let i = b.load(Type::I32, i_slot);
    let hundred = b.const_i32(100);
    let cond = b.compare(Predicate::Slt, i, hundred);
    b.cond_br(cond, body, exit);

    b.position_at(body);
    let pa = b.load(Type::Ptr, a_slot);
    let pb = b.load(Type::Ptr, b_slot);
    let i2 = b.load(Type::I32, i_slot);
    let i64v = b.cast(CastOp::SExt, i2, Type::I64);
    let gb = b.index_addr(pb, Type::I32, &[i64v]);
    let bi = b.load(Type::I32, gb);
    let idx = b.cast(CastOp::SExt, bi, Type::I64);
    let ga = b.index_addr(pa, Type::I32, &[idx]);
    let _av = b.load(Type::I32, ga);
    let i3 = b.load(Type::I32, i_slot);
    let one = b.const_i32(1);
    let inc = b.binary(BinOp::Add, i3, one);
    b.store(inc, i_slot);
    b.br(cond_block);

    b.position_at(exit);
    b.ret(Some(zero));

    IndexedLoop {
        program: b.finish().expect("valid program"),
        b: arr_b,
        a: arr_a,
    }
}

/// Handles of the struct-field aliasing fixture.
pub struct FieldAlias {
    pub program: Program,
    pub array: ValueId,
    /// Pointer reloaded from the field through a different struct pointer
    pub reloaded: ValueId,
}

/// `s1->data = arr` in `init`, `s2->data[i]` in `consume` with another struct pointer.
///
/// `reload_ty` is the struct type used on the reload side. With
/// `variable_first_index` both sides index an array of structs with
/// different variable indices instead of a constant 0.
pub fn field_alias(reload_ty: Type, variable_first_index: bool) -> FieldAlias {
    let mut b = ProgramBuilder::new();

    b.begin_function("init", &[Type::Ptr, Type::I64, Type::I64], Type::Void);
    let s1 = b.param(0).expect("param 0");
    let n = b.param(1).expect("param 1");
    let k = b.param(2).expect("param 2");
    let entry = b.block("entry");
    b.position_at(entry);
    let four = b.const_i64(4);
    let size = b.binary(BinOp::Mul, n, four);
    let array = b.call("malloc", &[size], Type::Ptr);
    b.name(array, "arr");
    let zero = b.const_i32(0);
    let one = b.const_i32(1);
    let first = if variable_first_index { k } else { zero };
    let field = b.index_addr(s1, holder_type(), &[first, one]);
    b.store(array, field);
    b.ret(None);

    b.begin_function("consume", &[Type::Ptr, Type::I64, Type::I64], Type::I32);
    let s2 = b.param(0).expect("param 0");
    let i = b.param(1).expect("param 1");
    let m = b.param(2).expect("param 2");
    let entry = b.block("entry");
    b.position_at(entry);
    let zero = b.const_i32(0);
    let one = b.const_i32(1);
    let first = if variable_first_index { m } else { zero };
    let field = b.index_addr(s2, reload_ty, &[first, one]);
    let reloaded = b.load(Type::Ptr, field);
    b.name(reloaded, "data");
    let elem = b.index_addr(reloaded, Type::I32, &[i]);
    let value = b.load(Type::I32, elem);
    b.ret(Some(value));

    FieldAlias {
        program: b.finish().expect("valid program"),
        array,
        reloaded,
    }
}

/// Handles of the global aliasing fixture.
pub struct GlobalAlias {
    pub program: Program,
    pub arrays: Vec<ValueId>,
    pub reloaded: ValueId,
}

/// Allocations stored into `@table`, then reloaded in `lookup`.
///
/// `stores` lists, per store into the global, which allocation it writes.
pub fn global_alias(allocations: usize, stores: &[usize]) -> GlobalAlias {
    let mut b = ProgramBuilder::new();
    let table = b.global("table");

    b.begin_function("init", &[Type::I64], Type::Void);
    let n = b.param(0).expect("param 0");
    let entry = b.block("entry");
    b.position_at(entry);
    let eight = b.const_i64(8);
    let size = b.binary(BinOp::Mul, n, eight);
    let arrays: Vec<ValueId> = (0..allocations)
        .map(|_| b.call("malloc", &[size], Type::Ptr))
        .collect();
    for &which in stores {
        b.store(arrays[which], table);
    }
    b.ret(None);

    b.begin_function("lookup", &[Type::I64], Type::I64);
    let i = b.param(0).expect("param 0");
    let entry = b.block("entry");
    b.position_at(entry);
    let reloaded = b.load(Type::Ptr, table);
    let elem = b.index_addr(reloaded, Type::I64, &[i]);
    let value = b.load(Type::I64, elem);
    b.ret(Some(value));

    GlobalAlias {
        program: b.finish().expect("valid program"),
        arrays,
        reloaded,
    }
}

/// Handles of the accessor fixture.
pub struct AccessorGraph {
    pub program: Program,
    pub index: ValueId,
    pub data: ValueId,
}

/// A `Graph { index, data }` on the stack and `neighbors_begin(&g, v)`
/// returning `&g.data[g.index[v]]`.
pub fn accessor_graph() -> AccessorGraph {
    let mut b = ProgramBuilder::new();

    b.begin_function("neighbors_begin", &[Type::Ptr, Type::I64], Type::Ptr);
    let this = b.param(0).expect("param 0");
    let v = b.param(1).expect("param 1");
    let entry = b.block("entry");
    b.position_at(entry);
    let zero = b.const_i32(0);
    let one = b.const_i32(1);
    let index_field = b.index_addr(this, graph_type(), &[zero, zero]);
    let index_array = b.load(Type::Ptr, index_field);
    let slot = b.index_addr(index_array, Type::I64, &[v]);
    let offset = b.load(Type::I64, slot);
    let data_field = b.index_addr(this, graph_type(), &[zero, one]);
    let data_array = b.load(Type::Ptr, data_field);
    let element = b.index_addr(data_array, Type::I32, &[offset]);
    b.ret(Some(element));

    b.begin_function("main", &[Type::I64, Type::I64], Type::I32);
    let n = b.param(0).expect("param 0");
    let m = b.param(1).expect("param 1");
    let entry = b.block("entry");
    b.position_at(entry);
    let graph = b.alloca(graph_type());
    let eight = b.const_i64(8);
    let four = b.const_i64(4);
    let index_size = b.binary(BinOp::Mul, n, eight);
    let index = b.call("malloc", &[index_size], Type::Ptr);
    b.name(index, "index");
    let data_size = b.binary(BinOp::Mul, m, four);
    let data = b.call("malloc", &[data_size], Type::Ptr);
    b.name(data, "data");
    let zero = b.const_i32(0);
    let one = b.const_i32(1);
    let f0 = b.index_addr(graph, graph_type(), &[zero, zero]);
    b.store(index, f0);
    let f1 = b.index_addr(graph, graph_type(), &[zero, one]);
    b.store(data, f1);
    let v0 = b.const_i64(0);
    let _first = b.call("neighbors_begin", &[graph, v0], Type::Ptr);
    b.ret(Some(zero));

    AccessorGraph {
        program: b.finish().expect("valid program"),
        index,
        data,
    }
}

/// `count` allocations in `main` plus a call to `bfs_neighbors`, a
/// multi-block function reading pointers out of a struct. No structural
/// indirection anywhere.
pub fn neighborhood_call(count: usize) -> Program {
    let mut b = ProgramBuilder::new();

    b.begin_function("bfs_neighbors", &[Type::Ptr], Type::I64);
    let this = b.param(0).expect("param 0");
    let entry = b.block("entry");
    let done = b.block("done");
    b.position_at(entry);
    let zero = b.const_i32(0);
    let field = b.index_addr(this, graph_type(), &[zero, zero]);
    let _list = b.load(Type::Ptr, field);
    b.br(done);
    b.position_at(done);
    let result = b.const_i64(0);
    b.ret(Some(result));

    b.begin_function("main", &[Type::I64], Type::I32);
    let n = b.param(0).expect("param 0");
    let entry = b.block("entry");
    b.position_at(entry);
    let four = b.const_i64(4);
    let size = b.binary(BinOp::Mul, n, four);
    let mut first = None;
    for _ in 0..count {
        let alloc = b.call("malloc", &[size], Type::Ptr);
        first.get_or_insert(alloc);
    }
    let object = first.unwrap_or(n);
    let _ = b.call("bfs_neighbors", &[object], Type::I64);
    let ret = b.const_i32(0);
    b.ret(Some(ret));

    b.finish().expect("valid program")
}

/// Single-function program allocating through `callee` with `args` built by `make_args`.
pub fn single_allocation(
    callee: &str,
    make_args: impl FnOnce(&mut ProgramBuilder, ValueId) -> Vec<ValueId>,
) -> (Program, ValueId) {
    let mut b = ProgramBuilder::new();
    b.begin_function("main", &[Type::I64], Type::I32);
    let n = b.param(0).expect("param 0");
    let entry = b.block("entry");
    b.position_at(entry);
    let args = make_args(&mut b, n);
    let site = b.call(callee, &args, Type::Ptr);
    let ret = b.const_i32(0);
    b.ret(Some(ret));
    (b.finish().expect("valid program"), site)
}
