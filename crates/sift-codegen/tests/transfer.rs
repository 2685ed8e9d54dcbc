//! End-to-end tests: generate a transfer function, JIT it, and run it
//! against records laid out by hand.
//!
//! Runtime helpers the generated code calls are stubbed here and
//! registered with LLVM's symbol resolver, the same way an embedding
//! application links the real runtime library.

use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Once;

use inkwell::context::Context;
use inkwell::OptimizationLevel;

use sift_codegen::{CmpOp, CodeGen, FieldDecl, FieldType, RecordSchema, Storage};

// ── Runtime stubs ────────────────────────────────────────────────────

static STUBS: Once = Once::new();
static CAPTURED_CTX: AtomicUsize = AtomicUsize::new(0);

unsafe extern "C" fn rt_decimal_add(
    a: *const i32,
    b: *const i32,
    ret: *mut i32,
    ctx: *mut std::ffi::c_void,
) {
    CAPTURED_CTX.store(ctx as usize, Ordering::SeqCst);
    for i in 0..4 {
        *ret.add(i) = *a.add(i) + *b.add(i);
    }
}

unsafe extern "C" fn rt_first_byte(data: *const u8) -> i32 {
    i32::from(*data)
}

// The stub encoding keeps the integer in dword 0.
unsafe extern "C" fn rt_decimal_from_i32(value: i32, ret: *mut i32, _ctx: *mut std::ffi::c_void) {
    *ret = value;
    for i in 1..4 {
        *ret.add(i) = 0;
    }
}

unsafe extern "C" fn rt_double_from_decimal(
    value: *const i32,
    ret: *mut f64,
    _ctx: *mut std::ffi::c_void,
) {
    *ret = f64::from(*value);
}

/// Register stub symbols with LLVM's JIT resolver. MCJIT falls back to
/// dlsym on some platforms, but explicit registration is reliable
/// everywhere.
fn register_stubs() {
    sift_codegen::init_tracing();
    STUBS.call_once(|| {
        extern "C" {
            fn LLVMAddSymbol(name: *const std::ffi::c_char, value: *mut std::ffi::c_void);
        }

        fn add_sym(name: &str, ptr: *const ()) {
            let c_name = std::ffi::CString::new(name).unwrap();
            unsafe {
                LLVMAddSymbol(c_name.as_ptr(), ptr as *mut std::ffi::c_void);
            }
        }

        add_sym("sift_decimal_add", rt_decimal_add as *const ());
        add_sym("sift_decimal_from_i32", rt_decimal_from_i32 as *const ());
        add_sym("sift_double_from_decimal", rt_double_from_decimal as *const ());
        add_sym("rt_first_byte", rt_first_byte as *const ());
    });
}

fn schema(name: &str, fields: &[(&str, FieldType)]) -> Rc<RecordSchema> {
    Rc::new(RecordSchema::new(
        name,
        fields
            .iter()
            .map(|(n, ty)| FieldDecl { name: (*n).to_string(), ty: *ty })
            .collect(),
    ))
}

// ── Tests ────────────────────────────────────────────────────────────

#[test]
fn transfer_adds_two_fields() {
    #[repr(C)]
    struct Pair {
        a: i32,
        b: i32,
    }
    #[repr(C)]
    struct Sum {
        sum: i32,
    }

    let context = Context::create();
    let mut cg = CodeGen::new(&context, "jit_add").unwrap();
    let input = schema("src", &[("a", FieldType::int32()), ("b", FieldType::int32())]);
    let output = schema("dst", &[("sum", FieldType::int32())]);
    cg.start_transfer_function("add_fields", &[("src", Rc::clone(&input))], output)
        .unwrap();

    let a = cg.lookup("a").unwrap().read(&mut cg).unwrap();
    let b = cg.lookup("b").unwrap().read(&mut cg).unwrap();
    let (sum, ty) = cg.build_add(a, &FieldType::int32(), b, &FieldType::int32()).unwrap();
    let out = cg.output_field("sum").unwrap();
    cg.store_value(&out, sum, &ty).unwrap();
    cg.finish_transfer_function().unwrap();
    cg.verify().unwrap();

    register_stubs();
    let module = cg.into_module();
    let ee = module
        .create_jit_execution_engine(OptimizationLevel::None)
        .expect("JIT engine");
    let f = unsafe {
        ee.get_function::<unsafe extern "C" fn(*const Pair, *mut Sum, *mut std::ffi::c_void)>(
            "add_fields",
        )
    }
    .expect("add_fields");

    let src = Pair { a: 19, b: 23 };
    let mut dst = Sum { sum: 0 };
    unsafe { f.call(&src, &mut dst, std::ptr::null_mut()) };
    assert_eq!(dst.sum, 42);
}

#[test]
fn null_bitmap_travels_with_the_payload() {
    #[repr(C)]
    struct Rec {
        nulls: u64,
        a: i32,
    }

    let context = Context::create();
    let mut cg = CodeGen::new(&context, "jit_null").unwrap();
    let input = schema("src", &[("a", FieldType::int32().nullable())]);
    let output = schema("dst", &[("c", FieldType::int32().nullable())]);
    cg.start_transfer_function("copy_nullable", &[("src", Rc::clone(&input))], output)
        .unwrap();

    let a = cg.lookup("a").unwrap().read(&mut cg).unwrap();
    let out = cg.output_field("c").unwrap();
    cg.store_value(&out, a, &FieldType::int32().nullable()).unwrap();
    cg.finish_transfer_function().unwrap();
    cg.verify().unwrap();

    register_stubs();
    let module = cg.into_module();
    let ee = module
        .create_jit_execution_engine(OptimizationLevel::None)
        .expect("JIT engine");
    let f = unsafe {
        ee.get_function::<unsafe extern "C" fn(*const Rec, *mut Rec, *mut std::ffi::c_void)>(
            "copy_nullable",
        )
    }
    .expect("copy_nullable");

    // Non-null input: the payload copies and the output bit clears.
    let src = Rec { nulls: 0, a: 17 };
    let mut dst = Rec { nulls: u64::MAX, a: 0 };
    unsafe { f.call(&src, &mut dst, std::ptr::null_mut()) };
    assert_eq!(dst.a, 17);
    assert_eq!(dst.nulls, u64::MAX & !1, "only bit 0 clears");

    // Null input: the bit sets and the payload is left alone.
    let src = Rec { nulls: 1, a: 999 };
    let mut dst = Rec { nulls: 0, a: 42 };
    unsafe { f.call(&src, &mut dst, std::ptr::null_mut()) };
    assert_eq!(dst.nulls & 1, 1);
    assert_eq!(dst.a, 42, "null stores skip the payload");
}

#[test]
fn while_loop_accumulates() {
    #[repr(C)]
    struct In {
        n: i32,
    }
    #[repr(C)]
    struct Out {
        total: i32,
    }

    let context = Context::create();
    let mut cg = CodeGen::new(&context, "jit_while").unwrap();
    let input = schema("src", &[("n", FieldType::int32())]);
    let output = schema("dst", &[("total", FieldType::int32())]);
    cg.start_transfer_function("sum_below", &[("src", Rc::clone(&input))], output)
        .unwrap();

    let int32 = FieldType::int32();
    let i_lv = cg.declare_local("i", &int32).unwrap();
    let t_lv = cg.declare_local("t", &int32).unwrap();
    let zero = cg.value(context.i32_type().const_zero().into(), None, Storage::Local);
    cg.store_value(&i_lv, zero, &int32).unwrap();
    cg.store_value(&t_lv, zero, &int32).unwrap();

    cg.while_begin().unwrap();
    let i = cg.lookup("i").unwrap().read(&mut cg).unwrap();
    let n = cg.lookup("n").unwrap().read(&mut cg).unwrap();
    let (cond, cond_ty) = cg.build_compare(CmpOp::Lt, i, &int32, n, &int32).unwrap();
    cg.while_statement_block(cond, &cond_ty).unwrap();

    let i = cg.lookup("i").unwrap().read(&mut cg).unwrap();
    let t = cg.lookup("t").unwrap().read(&mut cg).unwrap();
    let (sum, _) = cg.build_add(t, &int32, i, &int32).unwrap();
    cg.set_variable("t", sum, &int32).unwrap();
    let one = cg.value(context.i32_type().const_int(1, false).into(), None, Storage::Local);
    let (inc, _) = cg.build_add(i, &int32, one, &int32).unwrap();
    cg.set_variable("i", inc, &int32).unwrap();
    cg.while_finish().unwrap();

    let t = cg.lookup("t").unwrap().read(&mut cg).unwrap();
    let out = cg.output_field("total").unwrap();
    cg.store_value(&out, t, &int32).unwrap();
    cg.finish_transfer_function().unwrap();
    cg.verify().unwrap();

    register_stubs();
    let module = cg.into_module();
    let ee = module
        .create_jit_execution_engine(OptimizationLevel::None)
        .expect("JIT engine");
    let f = unsafe {
        ee.get_function::<unsafe extern "C" fn(*const In, *mut Out, *mut std::ffi::c_void)>(
            "sum_below",
        )
    }
    .expect("sum_below");

    let src = In { n: 5 };
    let mut dst = Out { total: -1 };
    unsafe { f.call(&src, &mut dst, std::ptr::null_mut()) };
    assert_eq!(dst.total, 10, "0 + 1 + 2 + 3 + 4");

    let src = In { n: 0 };
    let mut dst = Out { total: -1 };
    unsafe { f.call(&src, &mut dst, std::ptr::null_mut()) };
    assert_eq!(dst.total, 0, "zero iterations");
}

#[test]
fn case_picks_the_matching_arm() {
    #[repr(C)]
    struct In {
        x: i32,
    }
    #[repr(C)]
    struct Out {
        y: i32,
    }

    let context = Context::create();
    let mut cg = CodeGen::new(&context, "jit_case").unwrap();
    let input = schema("src", &[("x", FieldType::int32())]);
    let output = schema("dst", &[("y", FieldType::int32())]);
    cg.start_transfer_function("pick_arm", &[("src", Rc::clone(&input))], output)
        .unwrap();

    let int32 = FieldType::int32();
    cg.case_begin(&int32).unwrap();
    let x = cg.lookup("x").unwrap().read(&mut cg).unwrap();
    let ten = cg.value(context.i32_type().const_int(10, false).into(), None, Storage::Local);
    let (cond, cond_ty) = cg.build_compare(CmpOp::Gt, x, &int32, ten, &int32).unwrap();
    cg.case_block_condition(cond, &cond_ty).unwrap();
    let big = cg.value(context.i32_type().const_int(1, false).into(), None, Storage::Local);
    cg.case_block_then(big, &int32).unwrap();
    let small = cg.value(context.i32_type().const_int(2, false).into(), None, Storage::Local);
    cg.case_block_then(small, &int32).unwrap();
    let picked = cg.case_finish().unwrap();

    let out = cg.output_field("y").unwrap();
    cg.store_value(&out, picked, &int32).unwrap();
    cg.finish_transfer_function().unwrap();
    cg.verify().unwrap();

    register_stubs();
    let module = cg.into_module();
    let ee = module
        .create_jit_execution_engine(OptimizationLevel::None)
        .expect("JIT engine");
    let f = unsafe {
        ee.get_function::<unsafe extern "C" fn(*const In, *mut Out, *mut std::ffi::c_void)>(
            "pick_arm",
        )
    }
    .expect("pick_arm");

    let mut dst = Out { y: 0 };
    unsafe { f.call(&In { x: 15 }, &mut dst, std::ptr::null_mut()) };
    assert_eq!(dst.y, 1);
    unsafe { f.call(&In { x: 5 }, &mut dst, std::ptr::null_mut()) };
    assert_eq!(dst.y, 2);
}

#[test]
fn int_widens_to_double() {
    #[repr(C)]
    struct In {
        a: i32,
    }
    #[repr(C)]
    struct Out {
        d: f64,
    }

    let context = Context::create();
    let mut cg = CodeGen::new(&context, "jit_widen").unwrap();
    let input = schema("src", &[("a", FieldType::int32())]);
    let output = schema("dst", &[("d", FieldType::double())]);
    cg.start_transfer_function("widen", &[("src", Rc::clone(&input))], output)
        .unwrap();

    let a = cg.lookup("a").unwrap().read(&mut cg).unwrap();
    let conv = cg.convert_to(a, &FieldType::int32(), &FieldType::double()).unwrap();
    let out = cg.output_field("d").unwrap();
    cg.store_value(&out, conv, &FieldType::double()).unwrap();
    cg.finish_transfer_function().unwrap();
    cg.verify().unwrap();

    register_stubs();
    let module = cg.into_module();
    let ee = module
        .create_jit_execution_engine(OptimizationLevel::None)
        .expect("JIT engine");
    let f = unsafe {
        ee.get_function::<unsafe extern "C" fn(*const In, *mut Out, *mut std::ffi::c_void)>("widen")
    }
    .expect("widen");

    let mut dst = Out { d: 0.0 };
    unsafe { f.call(&In { a: 7 }, &mut dst, std::ptr::null_mut()) };
    assert_eq!(dst.d, 7.0);
}

#[test]
fn decimal_add_calls_the_runtime_with_the_context() {
    #[repr(C)]
    struct In {
        d1: [i32; 4],
        d2: [i32; 4],
    }
    #[repr(C)]
    struct Out {
        d: [i32; 4],
    }

    let context = Context::create();
    let mut cg = CodeGen::new(&context, "jit_decimal").unwrap();
    let input = schema("src", &[("d1", FieldType::decimal()), ("d2", FieldType::decimal())]);
    let output = schema("dst", &[("d", FieldType::decimal())]);
    cg.start_transfer_function("add_decimals", &[("src", Rc::clone(&input))], output)
        .unwrap();

    let d1 = cg.lookup("d1").unwrap().read(&mut cg).unwrap();
    let d2 = cg.lookup("d2").unwrap().read(&mut cg).unwrap();
    let (sum, ty) = cg.build_add(d1, &FieldType::decimal(), d2, &FieldType::decimal()).unwrap();
    let out = cg.output_field("d").unwrap();
    cg.store_value(&out, sum, &ty).unwrap();
    cg.finish_transfer_function().unwrap();
    cg.verify().unwrap();

    register_stubs();
    let module = cg.into_module();
    let ee = module
        .create_jit_execution_engine(OptimizationLevel::None)
        .expect("JIT engine");
    let f = unsafe {
        ee.get_function::<unsafe extern "C" fn(*const In, *mut Out, *mut std::ffi::c_void)>(
            "add_decimals",
        )
    }
    .expect("add_decimals");

    let src = In { d1: [1, 2, 3, 4], d2: [10, 20, 30, 40] };
    let mut dst = Out { d: [0; 4] };
    let mut runtime_state = 0u32;
    let ctx = (&mut runtime_state as *mut u32).cast::<std::ffi::c_void>();
    unsafe { f.call(&src, &mut dst, ctx) };
    assert_eq!(dst.d, [11, 22, 33, 44]);
    assert_eq!(
        CAPTURED_CTX.load(Ordering::SeqCst),
        ctx as usize,
        "the context pointer reaches the runtime"
    );
}

#[test]
fn decimal_round_trip_matches_direct_widening() {
    #[repr(C)]
    struct In {
        a: i32,
    }
    #[repr(C)]
    struct Out {
        via_decimal: f64,
        direct: f64,
    }

    let context = Context::create();
    let mut cg = CodeGen::new(&context, "jit_round_trip").unwrap();
    let input = schema("src", &[("a", FieldType::int32())]);
    let output =
        schema("dst", &[("via_decimal", FieldType::double()), ("direct", FieldType::double())]);
    cg.start_transfer_function("round_trip", &[("src", Rc::clone(&input))], output)
        .unwrap();

    let a = cg.lookup("a").unwrap().read(&mut cg).unwrap();
    let dec = cg.convert_to(a, &FieldType::int32(), &FieldType::decimal()).unwrap();
    let widened = cg.convert_to(dec, &FieldType::decimal(), &FieldType::double()).unwrap();
    let out = cg.output_field("via_decimal").unwrap();
    cg.store_value(&out, widened, &FieldType::double()).unwrap();

    let a = cg.lookup("a").unwrap().read(&mut cg).unwrap();
    let direct = cg.convert_to(a, &FieldType::int32(), &FieldType::double()).unwrap();
    let out = cg.output_field("direct").unwrap();
    cg.store_value(&out, direct, &FieldType::double()).unwrap();
    cg.finish_transfer_function().unwrap();
    cg.verify().unwrap();

    register_stubs();
    let module = cg.into_module();
    let ee = module
        .create_jit_execution_engine(OptimizationLevel::None)
        .expect("JIT engine");
    let f = unsafe {
        ee.get_function::<unsafe extern "C" fn(*const In, *mut Out, *mut std::ffi::c_void)>(
            "round_trip",
        )
    }
    .expect("round_trip");

    let mut dst = Out { via_decimal: 0.0, direct: 0.0 };
    unsafe { f.call(&In { a: 42 }, &mut dst, std::ptr::null_mut()) };
    assert_eq!(dst.via_decimal, 42.0);
    assert_eq!(dst.via_decimal, dst.direct);
}

#[test]
fn varchar_headers_decode_in_both_forms() {
    #[repr(C, align(8))]
    struct In {
        raw: [u8; 16],
    }
    #[repr(C)]
    struct Out {
        len: i32,
        first: i32,
    }

    let context = Context::create();
    let mut cg = CodeGen::new(&context, "jit_varchar").unwrap();
    let input = schema("src", &[("s", FieldType::varchar())]);
    let output = schema("dst", &[("len", FieldType::int32()), ("first", FieldType::int32())]);
    cg.start_transfer_function("decode_varchar", &[("src", Rc::clone(&input))], output)
        .unwrap();
    cg.bind_external_function(
        "first_byte",
        "rt_first_byte",
        &[FieldType::varchar()],
        &FieldType::int32(),
        false,
    )
    .unwrap();

    let s = cg.lookup("s").unwrap().read(&mut cg).unwrap();
    let size = cg.varchar_size(s).unwrap();
    let out_len = cg.output_field("len").unwrap();
    cg.store_value(&out_len, size, &FieldType::int32()).unwrap();

    let data = cg.varchar_data_ptr(s).unwrap();
    let first = cg
        .call_function("first_byte", &[data], &[FieldType::varchar()], &FieldType::int32())
        .unwrap();
    let out_first = cg.output_field("first").unwrap();
    cg.store_value(&out_first, first, &FieldType::int32()).unwrap();
    cg.finish_transfer_function().unwrap();
    cg.verify().unwrap();

    register_stubs();
    let module = cg.into_module();
    let ee = module
        .create_jit_execution_engine(OptimizationLevel::None)
        .expect("JIT engine");
    let f = unsafe {
        ee.get_function::<unsafe extern "C" fn(*const In, *mut Out, *mut std::ffi::c_void)>(
            "decode_varchar",
        )
    }
    .expect("decode_varchar");

    // Small form: bit 0 of byte 0 clear, length in the remaining seven
    // bits, data inline from byte 1.
    let mut small = In { raw: [0; 16] };
    small.raw[0] = 2 << 1;
    small.raw[1] = b'h';
    small.raw[2] = b'i';
    let mut dst = Out { len: -1, first: -1 };
    unsafe { f.call(&small, &mut dst, std::ptr::null_mut()) };
    assert_eq!(dst.len, 2);
    assert_eq!(dst.first, i32::from(b'h'));

    // Large form: bit 0 of dword 0 set, length in the remaining 31 bits,
    // data behind the pointer stored at byte 8.
    let payload = b"hello world, this is long";
    let mut large = In { raw: [0; 16] };
    let tagged = ((payload.len() as u32) << 1) | 1;
    large.raw[0..4].copy_from_slice(&tagged.to_le_bytes());
    let addr = payload.as_ptr() as u64;
    large.raw[8..16].copy_from_slice(&addr.to_le_bytes());
    let mut dst = Out { len: -1, first: -1 };
    unsafe { f.call(&large, &mut dst, std::ptr::null_mut()) };
    assert_eq!(dst.len, payload.len() as i32);
    assert_eq!(dst.first, i32::from(b'h'));
}
