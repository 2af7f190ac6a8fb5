//! End-to-end dispatch-loop tests driving assembled method bodies.

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

#[test]
fn integer_add_fast_path() {
    let (mut heap, mut ctx) = setup();
    let mut b = BodyBuilder::new(4, 1, 1);
    b.push_byte(2);
    b.push_byte(3);
    b.op(Opcode::AddI);
    b.op(Opcode::ReturnValue);
    let m = ctx.add_method(MethodInfo::new("add", 0, b.finish()));

    let ret = run(&mut heap, &mut ctx, m).unwrap().into_value().unwrap();
    assert!(matches!(ret, Value::Int(5)));
}

#[test]
fn conditional_branch_taken() {
    let (mut heap, mut ctx) = setup();
    let yes = ctx.pool.add_string("yes");
    let no = ctx.pool.add_string("no");

    let mut b = BodyBuilder::new(4, 1, 1);
    let taken = b.new_label();
    b.push_byte(1);
    b.push_byte(2);
    b.branch(Opcode::IfLt, taken);
    b.op_u32(Opcode::PushString, no);
    b.op(Opcode::ReturnValue);
    b.bind(taken);
    b.op_u32(Opcode::PushString, yes);
    b.op(Opcode::ReturnValue);
    let m = ctx.add_method(MethodInfo::new("branch", 0, b.finish()));

    let ret = run(&mut heap, &mut ctx, m).unwrap().into_value().unwrap();
    let Value::InternString(id) = ret else {
        panic!("expected a string result");
    };
    assert_eq!(ctx.pool.string(id), "yes");
}

#[test]
fn lookup_switch_default() {
    let (mut heap, mut ctx) = setup();
    let mut b = BodyBuilder::new(4, 1, 1);
    let default = b.new_label();
    let cases: Vec<_> = (0..3).map(|_| b.new_label()).collect();
    b.push_byte(9);
    b.lookup_switch(default, &cases);
    for (n, case) in cases.iter().enumerate() {
        b.bind(*case);
        b.push_byte(n as i8);
        b.op(Opcode::ReturnValue);
    }
    b.bind(default);
    b.push_byte(42);
    b.op(Opcode::ReturnValue);
    let m = ctx.add_method(MethodInfo::new("switch", 0, b.finish()));

    let ret = run(&mut heap, &mut ctx, m).unwrap().into_value().unwrap();
    assert!(matches!(ret, Value::Int(42)));
}

#[test]
fn lookup_switch_case_taken() {
    let (mut heap, mut ctx) = setup();
    let mut b = BodyBuilder::new(4, 1, 1);
    let default = b.new_label();
    let cases: Vec<_> = (0..3).map(|_| b.new_label()).collect();
    b.push_byte(1);
    b.lookup_switch(default, &cases);
    for (n, case) in cases.iter().enumerate() {
        b.bind(*case);
        b.push_byte(10 + n as i8);
        b.op(Opcode::ReturnValue);
    }
    b.bind(default);
    b.push_byte(42);
    b.op(Opcode::ReturnValue);
    let m = ctx.add_method(MethodInfo::new("switch", 0, b.finish()));

    let ret = run(&mut heap, &mut ctx, m).unwrap().into_value().unwrap();
    assert!(matches!(ret, Value::Int(11)));
}

#[test]
fn division_by_zero_modulo_is_nan() {
    let (mut heap, mut ctx) = setup();
    let mut b = BodyBuilder::new(4, 1, 1);
    b.push_byte(7);
    b.push_byte(0);
    b.op(Opcode::Modulo);
    b.op(Opcode::ReturnValue);
    let m = ctx.add_method(MethodInfo::new("mod0", 0, b.finish()));

    let ret = run(&mut heap, &mut ctx, m).unwrap().into_value().unwrap();
    let Value::Number(n) = ret else {
        panic!("expected a Number result");
    };
    assert!(n.value.is_nan());
}

#[test]
fn modulo_fast_path_is_ecma_ordered() {
    let (mut heap, mut ctx) = setup();
    let mut b = BodyBuilder::new(4, 1, 1);
    b.push_byte(7);
    b.push_byte(3);
    b.op(Opcode::Modulo);
    b.op(Opcode::ReturnValue);
    let m = ctx.add_method(MethodInfo::new("mod", 0, b.finish()));

    let ret = run(&mut heap, &mut ctx, m).unwrap().into_value().unwrap();
    let Value::Number(n) = ret else {
        panic!("expected a Number result");
    };
    assert_eq!(n.value, 1.0);
    assert!(!n.is_float);
}

#[test]
fn modulo_slow_path_keeps_swapped_operands() {
    // The double path reproduces the original's operand routing, which
    // computes rhs-mod-lhs. 7.5 and 2 therefore yield 2 % 7.5 = 2.
    let (mut heap, mut ctx) = setup();
    let mut b = BodyBuilder::new(4, 1, 1);
    b.push_double(7.5);
    b.push_byte(2);
    b.op(Opcode::Modulo);
    b.op(Opcode::ReturnValue);
    let m = ctx.add_method(MethodInfo::new("modf", 0, b.finish()));

    let ret = run(&mut heap, &mut ctx, m).unwrap().into_value().unwrap();
    let Value::Number(n) = ret else {
        panic!("expected a Number result");
    };
    assert_eq!(n.value, 2.0);
}

#[test]
fn subtract_keeps_integral_result() {
    let (mut heap, mut ctx) = setup();
    let mut b = BodyBuilder::new(4, 1, 1);
    b.push_byte(7);
    b.push_byte(2);
    b.op(Opcode::Subtract);
    b.op(Opcode::ReturnValue);
    let m = ctx.add_method(MethodInfo::new("sub", 0, b.finish()));

    let ret = run(&mut heap, &mut ctx, m).unwrap().into_value().unwrap();
    let Value::Number(n) = ret else {
        panic!("expected a Number result");
    };
    assert_eq!(n.value, 5.0);
    assert!(!n.is_float);
}

#[test]
fn divide_always_widens() {
    let (mut heap, mut ctx) = setup();
    let mut b = BodyBuilder::new(4, 1, 1);
    b.push_byte(7);
    b.push_byte(2);
    b.op(Opcode::Divide);
    b.op(Opcode::ReturnValue);
    let m = ctx.add_method(MethodInfo::new("div", 0, b.finish()));

    let ret = run(&mut heap, &mut ctx, m).unwrap().into_value().unwrap();
    let Value::Number(n) = ret else {
        panic!("expected a Number result");
    };
    assert_eq!(n.value, 3.5);
    assert!(n.is_float);
}

#[test]
fn pushshort_reads_a_full_u32() {
    let (mut heap, mut ctx) = setup();
    let mut b = BodyBuilder::new(4, 1, 1);
    b.op_u32(Opcode::PushShort, 0x8000_0001);
    b.op(Opcode::ReturnValue);
    let m = ctx.add_method(MethodInfo::new("short", 0, b.finish()));

    let ret = run(&mut heap, &mut ctx, m).unwrap().into_value().unwrap();
    assert!(matches!(ret, Value::Int(-2_147_483_647)));
}

#[test]
fn convert_i_leaves_integers_alone() {
    let (mut heap, mut ctx) = setup();
    let mut b = BodyBuilder::new(4, 1, 1);
    b.push_byte(5);
    b.op(Opcode::ConvertI);
    b.op(Opcode::ReturnValue);
    let m = ctx.add_method(MethodInfo::new("cvt", 0, b.finish()));

    let ret = run(&mut heap, &mut ctx, m).unwrap().into_value().unwrap();
    assert!(matches!(ret, Value::Int(5)));
}

#[test]
fn convert_d_makes_integral_numbers() {
    let (mut heap, mut ctx) = setup();
    let mut b = BodyBuilder::new(4, 1, 1);
    b.push_byte(5);
    b.op(Opcode::ConvertD);
    b.op(Opcode::ReturnValue);
    let m = ctx.add_method(MethodInfo::new("cvtd", 0, b.finish()));

    let ret = run(&mut heap, &mut ctx, m).unwrap().into_value().unwrap();
    let Value::Number(n) = ret else {
        panic!("expected a Number result");
    };
    assert_eq!(n.value, 5.0);
    assert!(!n.is_float);
}

#[test]
fn increment_stays_integral() {
    let (mut heap, mut ctx) = setup();
    let mut b = BodyBuilder::new(4, 1, 1);
    b.push_byte(5);
    b.op(Opcode::Increment);
    b.op(Opcode::ReturnValue);
    let m = ctx.add_method(MethodInfo::new("inc", 0, b.finish()));

    let ret = run(&mut heap, &mut ctx, m).unwrap().into_value().unwrap();
    let Value::Number(n) = ret else {
        panic!("expected a Number result");
    };
    assert_eq!(n.value, 6.0);
    assert!(!n.is_float);
}

#[test]
fn typeof_pushes_the_type_name() {
    let (mut heap, mut ctx) = setup();
    let mut b = BodyBuilder::new(4, 1, 1);
    b.push_byte(1);
    b.op(Opcode::TypeOf);
    b.op(Opcode::ReturnValue);
    let m = ctx.add_method(MethodInfo::new("typeof", 0, b.finish()));

    let ret = run(&mut heap, &mut ctx, m).unwrap().into_value().unwrap();
    let Value::InternString(id) = ret else {
        panic!("expected a string result");
    };
    assert_eq!(ctx.pool.string(id), "number");
}

#[test]
fn kill_resets_a_local_to_undefined() {
    let (mut heap, mut ctx) = setup();
    let mut b = BodyBuilder::new(4, 2, 1);
    b.push_byte(9);
    b.op_u32(Opcode::SetLocal, 1);
    b.op_u32(Opcode::Kill, 1);
    b.op_u32(Opcode::GetLocal, 1);
    b.op(Opcode::ReturnValue);
    let m = ctx.add_method(MethodInfo::new("kill", 0, b.finish()));

    let ret = run(&mut heap, &mut ctx, m).unwrap().into_value().unwrap();
    assert!(matches!(ret, Value::Undefined));
}

#[test]
fn rest_argument_slot_write_is_guarded() {
    let (mut heap, mut ctx) = setup();

    // A non-Array write to the rest slot is suppressed.
    let mut b = BodyBuilder::new(4, 2, 1);
    b.push_byte(7);
    b.op_u32(Opcode::SetLocal, 1);
    b.op_u32(Opcode::GetLocal, 1);
    b.op(Opcode::ReturnValue);
    let mut info = MethodInfo::new("guarded", 0, b.finish());
    info.needs_rest = true;
    let m = ctx.add_method(info);
    let ret = run(&mut heap, &mut ctx, m).unwrap().into_value().unwrap();
    assert!(ret.is_array(&heap), "non-Array write must not clobber the rest array");
    ret.drop_with_heap(&mut heap);

    // An Array write replaces it.
    let mut b = BodyBuilder::new(4, 2, 1);
    b.push_byte(9);
    b.op_u32(Opcode::NewArray, 1);
    b.op_u32(Opcode::SetLocal, 1);
    b.op_u32(Opcode::GetLocal, 1);
    b.op_u32(Opcode::GetProperty, ctx.pool.add_qname("length"));
    b.op(Opcode::ReturnValue);
    let mut info = MethodInfo::new("replaced", 0, b.finish());
    info.needs_rest = true;
    let m = ctx.add_method(info);
    let ret = run(&mut heap, &mut ctx, m).unwrap().into_value().unwrap();
    assert!(matches!(ret, Value::Int(1)));
}

#[test]
fn alchemy_store_load_round_trip() {
    let (mut heap, mut ctx) = setup();
    ctx.domain.resize_memory(16);

    let mut b = BodyBuilder::new(4, 1, 1);
    b.push_byte(42);
    b.push_byte(4);
    b.op(Opcode::Si32);
    b.push_byte(4);
    b.op(Opcode::Li32);
    b.op(Opcode::ReturnValue);
    let m = ctx.add_method(MethodInfo::new("mem", 0, b.finish()));

    let ret = run(&mut heap, &mut ctx, m).unwrap().into_value().unwrap();
    assert!(matches!(ret, Value::Int(42)));
}

#[test]
fn alchemy_load_out_of_bounds_is_a_range_error() {
    let (mut heap, mut ctx) = setup();
    ctx.domain.resize_memory(2);

    let mut b = BodyBuilder::new(4, 1, 1);
    b.push_byte(0);
    b.op(Opcode::Li32);
    b.op(Opcode::ReturnValue);
    let m = ctx.add_method(MethodInfo::new("oob", 0, b.finish()));

    let err = run(&mut heap, &mut ctx, m).unwrap_err();
    assert_eq!(err.kind, embervm::ErrorKind::RangeError);
    assert_eq!(err.code, 1506);
}

#[test]
fn sign_extension_opcodes() {
    let (mut heap, mut ctx) = setup();
    let mut b = BodyBuilder::new(4, 1, 1);
    b.op_u32(Opcode::PushShort, 0x80);
    b.op(Opcode::Sxi8);
    b.op(Opcode::ReturnValue);
    let m = ctx.add_method(MethodInfo::new("sx", 0, b.finish()));

    let ret = run(&mut heap, &mut ctx, m).unwrap().into_value().unwrap();
    assert!(matches!(ret, Value::Int(-128)));
}

#[test]
fn refcounts_balance_across_stack_shuffles() {
    let (mut heap, mut ctx) = setup();
    let baseline = heap.live_count();

    let mut b = BodyBuilder::new(8, 1, 1);
    b.op_u32(Opcode::NewArray, 0);
    b.op(Opcode::Dup);
    b.op(Opcode::Swap);
    b.op(Opcode::Pop);
    b.op(Opcode::Pop);
    b.op(Opcode::ReturnVoid);
    let m = ctx.add_method(MethodInfo::new("shuffle", 0, b.finish()));

    match run(&mut heap, &mut ctx, m).unwrap() {
        Return::Void => {}
        Return::Value(_) => panic!("expected a void return"),
    }
    assert_eq!(heap.live_count(), baseline);
}

#[test]
fn unknown_opcode_is_a_parse_exception() {
    let (mut heap, mut ctx) = setup();
    let mut b = BodyBuilder::new(4, 1, 1);
    b.op(Opcode::Nop);
    let mut body = b.finish();
    body.code.push(0x09);
    let m = ctx.add_method(MethodInfo::new("bad", 0, body));

    let err = run(&mut heap, &mut ctx, m).unwrap_err();
    assert_eq!(err.kind, embervm::ErrorKind::ParseException);
}

#[test]
fn string_add_concatenates() {
    let (mut heap, mut ctx) = setup();
    let hello = ctx.pool.add_string("hello ");
    let mut b = BodyBuilder::new(4, 1, 1);
    b.op_u32(Opcode::PushString, hello);
    b.push_byte(5);
    b.op(Opcode::Add);
    b.op(Opcode::ReturnValue);
    let m = ctx.add_method(MethodInfo::new("concat", 0, b.finish()));

    let ret = run(&mut heap, &mut ctx, m).unwrap().into_value().unwrap();
    let Value::Ref(id) = &ret else {
        panic!("expected a heap string");
    };
    let embervm::HeapData::Str(s) = heap.get(*id) else {
        panic!("expected a heap string");
    };
    assert_eq!(s, "hello 5");
    ret.drop_with_heap(&mut heap);
}
