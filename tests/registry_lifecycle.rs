//! Handle lifetimes across object kinds

mod common;

use clmetal::*;
use common::Fixture;

#[test]
fn test_handles_are_distinct_across_kinds() {
    let fx = Fixture::new();
    let mem = fx.buffer(16);
    let program = fx
        .runtime
        .create_program_with_source(fx.context, &["__kernel void k() {}"])
        .unwrap();
    let raws = [
        fx.context.raw(),
        fx.queue.raw(),
        mem.raw(),
        program.raw(),
        fx.device.raw(),
    ];
    for (i, a) in raws.iter().enumerate() {
        for b in &raws[i + 1..] {
            assert_ne!(a, b);
        }
    }
}

#[test]
fn test_retain_and_release_track_the_count() {
    let fx = Fixture::new();
    let mem = fx.buffer(16);
    let count = |rt: &Runtime| {
        rt.mem_info(mem, CL_MEM_REFERENCE_COUNT)
            .unwrap()
            .as_uint()
            .unwrap()
    };
    assert_eq!(count(&fx.runtime), 1);
    fx.runtime.retain_mem_object(mem).unwrap();
    fx.runtime.retain_mem_object(mem).unwrap();
    assert_eq!(count(&fx.runtime), 3);
    fx.runtime.release_mem_object(mem).unwrap();
    fx.runtime.release_mem_object(mem).unwrap();
    assert_eq!(count(&fx.runtime), 1);
    assert!(fx.runtime.is_live(mem));

    fx.runtime.release_mem_object(mem).unwrap();
    assert!(!fx.runtime.is_live(mem));
}

#[test]
fn test_released_handle_is_invalid() {
    let fx = Fixture::new();
    let mem = fx.buffer(16);
    fx.runtime.release_mem_object(mem).unwrap();

    let err = fx.runtime.release_mem_object(mem).unwrap_err();
    assert_eq!(err.code(), CL_INVALID_MEM_OBJECT);
    let err = fx.runtime.mem_info(mem, CL_MEM_SIZE).unwrap_err();
    assert_eq!(err.code(), CL_INVALID_MEM_OBJECT);
}

#[test]
fn test_handle_of_the_wrong_kind_is_rejected() {
    let fx = Fixture::new();
    let mem = fx.buffer(16);
    // a buffer's value reinterpreted as a queue
    let bogus = QueueId::from_raw(mem.raw()).unwrap();
    let err = fx.runtime.finish(bogus).unwrap_err();
    assert_eq!(err.code(), CL_INVALID_COMMAND_QUEUE);
}

#[test]
fn test_kernel_keeps_its_program_alive() {
    let fx = Fixture::new();
    let program = fx.program("__kernel void k(__global int* x) { x[0] = 1; }");
    let kernel = fx.runtime.create_kernel(program, "k").unwrap();
    fx.runtime.release_program(program).unwrap();
    assert!(!fx.runtime.is_live(program));

    let mem = fx.buffer(4);
    fx.runtime
        .set_kernel_arg(kernel, 0, KernelArg::Mem(mem))
        .unwrap();
    fx.run(kernel, &[1], None);
    assert_eq!(common::to_i32(&fx.read(mem, 4)), vec![1]);
    fx.runtime.release_kernel(kernel).unwrap();
}

#[test]
fn test_platform_and_device_are_never_released() {
    let fx = Fixture::new();
    let platform = fx.runtime.platform_ids()[0];
    assert_eq!(fx.runtime.platform_ids(), vec![platform]);
    let name = fx.runtime.platform_info(platform, CL_PLATFORM_NAME).unwrap();
    assert_eq!(name.as_str(), Some("clmetal"));
    assert!(fx.runtime.is_live(fx.device));
}

#[test]
fn test_context_needs_one_release_per_reference() {
    let fx = Fixture::new();
    let context = fx.runtime.create_context(&[fx.device]).unwrap();
    for _ in 0..3 {
        fx.runtime.retain_context(context).unwrap();
    }
    for _ in 0..3 {
        fx.runtime.release_context(context).unwrap();
        assert!(fx.runtime.is_live(context));
    }
    fx.runtime.release_context(context).unwrap();
    assert!(!fx.runtime.is_live(context));

    let err = fx.runtime.release_context(context).unwrap_err();
    assert_eq!(err, ClError::InvalidHandle(HandleKind::Context));
}

#[test]
fn test_never_issued_handles_do_not_resolve() {
    let fx = Fixture::new();
    let unknown = ContextId::from_raw(u64::MAX).unwrap();
    assert_eq!(
        fx.runtime.context_info(unknown, CL_CONTEXT_NUM_DEVICES).unwrap_err().code(),
        CL_INVALID_CONTEXT
    );
    let unknown = EventId::from_raw(1 << 40).unwrap();
    assert_eq!(
        fx.runtime.event_status(unknown).unwrap_err().code(),
        CL_INVALID_EVENT
    );
}
