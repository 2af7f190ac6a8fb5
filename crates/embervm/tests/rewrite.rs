//! Self-rewriting opcode tests: `coerce` -> `coerceearly` and
//! `getlexonce` -> `pushearly`.

use embervm::{
    AbcContext, BodyBuilder, Heap, Interpreter, MethodInfo, Opcode, Return, RunResult, Value,
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

fn number_result(ret: Return) -> f64 {
    match ret.into_value() {
        Some(Value::Number(n)) => n.value,
        other => panic!("expected a Number result, got {other:?}"),
    }
}

#[test]
fn coerce_rewrites_itself_to_coerceearly() {
    let (mut heap, mut ctx) = setup();
    let five = ctx.pool.add_string("5");
    let number_name = ctx.pool.add_qname("Number");

    let mut b = BodyBuilder::new(4, 1, 1);
    b.op_u32(Opcode::PushString, five);
    b.coerce(number_name);
    b.op(Opcode::ReturnValue);
    let m = ctx.add_method(MethodInfo::new("coerce", 0, b.finish()));

    // pushstring is 5 bytes, so the coerce site sits at offset 5.
    let site = 5;
    assert_eq!(ctx.method(m).body.code[site], Opcode::Coerce as u8);

    let first = number_result(run(&mut heap, &mut ctx, m).unwrap());
    assert_eq!(first, 5.0);
    assert_eq!(ctx.method(m).body.code[site], Opcode::CoerceEarly as u8);

    // Subsequent executions observe the rewritten opcode and produce the
    // same output.
    let second = number_result(run(&mut heap, &mut ctx, m).unwrap());
    assert_eq!(second, 5.0);
    let third = number_result(run(&mut heap, &mut ctx, m).unwrap());
    assert_eq!(third, 5.0);
    assert_eq!(ctx.method(m).body.code[site], Opcode::CoerceEarly as u8);
}

#[test]
fn coerce_to_unknown_class_is_a_reference_error() {
    let (mut heap, mut ctx) = setup();
    let name = ctx.pool.add_qname("NoSuchClass");
    let mut b = BodyBuilder::new(4, 1, 1);
    b.push_byte(1);
    b.coerce(name);
    b.op(Opcode::ReturnValue);
    let m = ctx.add_method(MethodInfo::new("coerce", 0, b.finish()));

    let err = run(&mut heap, &mut ctx, m).unwrap_err();
    assert_eq!(err.kind, embervm::ErrorKind::ReferenceError);
    assert_eq!(err.code, 1014);
}

#[test]
fn coerce_failure_is_a_type_error_1034() {
    let (mut heap, mut ctx) = setup();
    let name = ctx.pool.add_qname("Array");
    let mut b = BodyBuilder::new(4, 1, 1);
    b.push_byte(1);
    b.coerce(name);
    b.op(Opcode::ReturnValue);
    let m = ctx.add_method(MethodInfo::new("coerce", 0, b.finish()));

    let err = run(&mut heap, &mut ctx, m).unwrap_err();
    assert_eq!(err.kind, embervm::ErrorKind::TypeError);
    assert_eq!(err.code, 1034);
}

#[test]
fn getlexonce_rewrites_itself_to_pushearly() {
    let (mut heap, mut ctx) = setup();
    let answer = Value::abstract_s(&mut heap, "forty-two");
    ctx.domain.define_global(&mut heap, "answer", answer);
    let name = ctx.pool.add_qname("answer");

    let mut b = BodyBuilder::new(4, 1, 1);
    b.getlexonce(name);
    b.op(Opcode::ReturnValue);
    let m = ctx.add_method(MethodInfo::new("lexonce", 0, b.finish()));

    assert_eq!(ctx.method(m).body.code[0], Opcode::GetLexOnce as u8);
    let baseline = heap.live_count();

    let first = run(&mut heap, &mut ctx, m).unwrap().into_value().unwrap();
    assert_eq!(ctx.method(m).body.code[0], Opcode::PushEarly as u8);
    first.drop_with_heap(&mut heap);
    // The cache holds one extra reference to the resolved value, but no new
    // entries appear.
    assert_eq!(heap.live_count(), baseline);

    let second = run(&mut heap, &mut ctx, m).unwrap().into_value().unwrap();
    let Value::Ref(id) = &second else {
        panic!("expected the cached heap string");
    };
    let embervm::HeapData::Str(s) = heap.get(*id) else {
        panic!("expected the cached heap string");
    };
    assert_eq!(s, "forty-two");
    second.drop_with_heap(&mut heap);
    assert_eq!(heap.live_count(), baseline);
}

#[test]
fn getlexonce_unresolved_is_a_reference_error() {
    let (mut heap, mut ctx) = setup();
    let name = ctx.pool.add_qname("missing");
    let mut b = BodyBuilder::new(4, 1, 1);
    b.getlexonce(name);
    b.op(Opcode::ReturnValue);
    let m = ctx.add_method(MethodInfo::new("lexonce", 0, b.finish()));

    let err = run(&mut heap, &mut ctx, m).unwrap_err();
    assert_eq!(err.kind, embervm::ErrorKind::ReferenceError);
    assert_eq!(err.code, 1065);
    // The site must not have been rewritten.
    assert_eq!(ctx.method(m).body.code[0], Opcode::GetLexOnce as u8);
}
