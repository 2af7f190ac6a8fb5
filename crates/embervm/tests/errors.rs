//! Exception propagation and handler-table tests.

use embervm::{
    AbcContext, BodyBuilder, ErrorKind, Heap, Interpreter, MethodInfo, Opcode, Return, RunResult,
    Value,
};

fn setup() -> (Heap, AbcContext) {
    let mut heap = Heap::new();
    let ctx = AbcContext::new(&mut heap);
    (heap, ctx)
}

fn run(heap: &mut Heap, ctx: &mut AbcContext, method: embervm::MethodId) -> RunResult<Return> {
    let mut interp = Interpreter::new(heap, ctx);
    interp.call_method(method, Value::Undefined, vec![], vec![])
}

#[test]
fn uncaught_convert_o_on_null_is_a_type_error() {
    let (mut heap, mut ctx) = setup();
    let baseline = heap.live_count();

    let mut b = BodyBuilder::new(4, 1, 1);
    b.op(Opcode::PushNull);
    b.op(Opcode::ConvertO);
    b.op(Opcode::ReturnVoid);
    let m = ctx.add_method(MethodInfo::new("nullobj", 0, b.finish()));

    let err = run(&mut heap, &mut ctx, m).unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypeError);
    assert_eq!(err.code, 1009);
    err.dispose(&mut heap);
    // The operand stack was torn down with the context.
    assert_eq!(heap.live_count(), baseline);
}

#[test]
fn convert_o_on_undefined_uses_code_1010() {
    let (mut heap, mut ctx) = setup();
    let mut b = BodyBuilder::new(4, 1, 1);
    b.op(Opcode::PushUndefined);
    b.op(Opcode::ConvertO);
    b.op(Opcode::ReturnVoid);
    let m = ctx.add_method(MethodInfo::new("undefobj", 0, b.finish()));

    let err = run(&mut heap, &mut ctx, m).unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypeError);
    assert_eq!(err.code, 1010);
}

#[test]
fn thrown_value_lands_on_the_handler_with_a_cleared_stack() {
    let (mut heap, mut ctx) = setup();
    let boom = ctx.pool.add_string("boom");

    let mut b = BodyBuilder::new(8, 1, 1);
    let from = b.new_label();
    let to = b.new_label();
    let target = b.new_label();
    b.bind(from);
    // Junk below the thrown value proves the handler sees a cleared stack.
    b.push_byte(1);
    b.push_byte(2);
    b.op_u32(Opcode::PushString, boom);
    b.op(Opcode::Throw);
    b.bind(to);
    b.op(Opcode::ReturnVoid);
    b.bind(target);
    // Exactly the error value is on the stack here.
    b.op(Opcode::ReturnValue);
    b.handler(from, to, target, None);
    let m = ctx.add_method(MethodInfo::new("catcher", 0, b.finish()));

    let ret = run(&mut heap, &mut ctx, m).unwrap().into_value().unwrap();
    let Value::InternString(id) = ret else {
        panic!("expected the thrown string");
    };
    assert_eq!(ctx.pool.string(id), "boom");
}

#[test]
fn primitive_errors_are_catchable_by_kind() {
    let (mut heap, mut ctx) = setup();

    let mut b = BodyBuilder::new(8, 1, 1);
    let from = b.new_label();
    let to = b.new_label();
    let target = b.new_label();
    b.bind(from);
    b.op(Opcode::PushNull);
    b.op(Opcode::ConvertO);
    b.bind(to);
    b.op(Opcode::ReturnVoid);
    b.bind(target);
    b.op_u32(Opcode::GetProperty, ctx.pool.add_qname("errorID"));
    b.op(Opcode::ReturnValue);
    b.handler(from, to, target, Some(ErrorKind::TypeError));
    let m = ctx.add_method(MethodInfo::new("typed", 0, b.finish()));

    let ret = run(&mut heap, &mut ctx, m).unwrap().into_value().unwrap();
    assert!(matches!(ret, Value::Int(1009)));
}

#[test]
fn handler_with_wrong_kind_does_not_catch() {
    let (mut heap, mut ctx) = setup();

    let mut b = BodyBuilder::new(8, 1, 1);
    let from = b.new_label();
    let to = b.new_label();
    let target = b.new_label();
    b.bind(from);
    b.op(Opcode::PushNull);
    b.op(Opcode::ConvertO);
    b.bind(to);
    b.op(Opcode::ReturnVoid);
    b.bind(target);
    b.op(Opcode::ReturnValue);
    b.handler(from, to, target, Some(ErrorKind::RangeError));
    let m = ctx.add_method(MethodInfo::new("mismatched", 0, b.finish()));

    let err = run(&mut heap, &mut ctx, m).unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypeError);
}

#[test]
fn handler_outside_the_covered_range_does_not_catch() {
    let (mut heap, mut ctx) = setup();

    let mut b = BodyBuilder::new(8, 1, 1);
    let from = b.new_label();
    let to = b.new_label();
    let target = b.new_label();
    // The faulting opcode sits before the covered range.
    b.op(Opcode::PushNull);
    b.op(Opcode::ConvertO);
    b.bind(from);
    b.op(Opcode::Nop);
    b.bind(to);
    b.op(Opcode::ReturnVoid);
    b.bind(target);
    b.op(Opcode::ReturnValue);
    b.handler(from, to, target, None);
    let m = ctx.add_method(MethodInfo::new("uncovered", 0, b.finish()));

    assert!(run(&mut heap, &mut ctx, m).is_err());
}

#[test]
fn errors_cross_call_frames_to_outer_handlers() {
    let (mut heap, mut ctx) = setup();

    // Inner method throws with no handler of its own.
    let mut inner = BodyBuilder::new(4, 1, 1);
    let s = ctx.pool.add_string("inner fault");
    inner.op_u32(Opcode::PushString, s);
    inner.op(Opcode::Throw);
    let inner_m = ctx.add_method(MethodInfo::new("inner", 0, inner.finish()));

    // Outer method calls it inside a covered range.
    let mut outer = BodyBuilder::new(8, 1, 1);
    let from = outer.new_label();
    let to = outer.new_label();
    let target = outer.new_label();
    outer.bind(from);
    outer.op_u32(Opcode::NewFunction, inner_m.raw());
    outer.op(Opcode::PushNull);
    outer.op_u32(Opcode::Call, 0);
    outer.bind(to);
    outer.op(Opcode::ReturnVoid);
    outer.bind(target);
    outer.op(Opcode::ReturnValue);
    outer.handler(from, to, target, None);
    let outer_m = ctx.add_method(MethodInfo::new("outer", 0, outer.finish()));

    let ret = run(&mut heap, &mut ctx, outer_m).unwrap().into_value().unwrap();
    let Value::InternString(id) = ret else {
        panic!("expected the inner thrown string");
    };
    assert_eq!(ctx.pool.string(id), "inner fault");
}

#[test]
fn checkfilter_raises_the_filter_error() {
    let (mut heap, mut ctx) = setup();
    let mut b = BodyBuilder::new(4, 1, 1);
    b.push_byte(1);
    b.op(Opcode::CheckFilter);
    b.op(Opcode::ReturnVoid);
    let m = ctx.add_method(MethodInfo::new("filter", 0, b.finish()));

    let err = run(&mut heap, &mut ctx, m).unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypeError);
    assert_eq!(err.code, 1123);
}

#[test]
fn findpropstrict_unresolved_is_a_reference_error() {
    let (mut heap, mut ctx) = setup();
    let name = ctx.pool.add_qname("nothing_here");
    let mut b = BodyBuilder::new(4, 1, 1);
    b.op_u32(Opcode::FindPropStrict, name);
    b.op(Opcode::ReturnValue);
    let m = ctx.add_method(MethodInfo::new("strict", 0, b.finish()));

    let err = run(&mut heap, &mut ctx, m).unwrap_err();
    assert_eq!(err.kind, ErrorKind::ReferenceError);
    assert_eq!(err.code, 1065);
}

#[test]
fn finddef_logs_and_pushes_null() {
    let (mut heap, mut ctx) = setup();
    let name = ctx.pool.add_qname("whatever");
    let mut b = BodyBuilder::new(4, 1, 1);
    b.op_u32(Opcode::FindDef, name);
    b.op(Opcode::ReturnValue);
    let m = ctx.add_method(MethodInfo::new("finddef", 0, b.finish()));

    let ret = run(&mut heap, &mut ctx, m).unwrap().into_value().unwrap();
    assert!(ret.is_null());
}

#[test]
fn lookupswitch_requires_an_integer_index() {
    let (mut heap, mut ctx) = setup();
    let mut b = BodyBuilder::new(4, 1, 1);
    let default = b.new_label();
    let case = b.new_label();
    b.push_double(1.5);
    b.lookup_switch(default, &[case]);
    b.bind(default);
    b.bind(case);
    b.op(Opcode::ReturnVoid);
    let m = ctx.add_method(MethodInfo::new("badswitch", 0, b.finish()));

    let err = run(&mut heap, &mut ctx, m).unwrap_err();
    assert_eq!(err.kind, ErrorKind::VerifyError);
}
