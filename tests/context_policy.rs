//! Context release with live children

mod common;

use std::sync::mpsc;
use std::time::Duration;

use clmetal::*;
use common::Fixture;

fn context_refs(fx: &Fixture) -> u32 {
    fx.runtime
        .context_info(fx.context, CL_CONTEXT_REFERENCE_COUNT)
        .unwrap()
        .as_uint()
        .unwrap()
}

#[test]
fn test_strict_policy_refuses_release() {
    let fx = Fixture::new();
    let mem = fx.buffer(64);
    // live children count towards the reported references
    let before = context_refs(&fx);
    assert_eq!(before, 3);

    let err = fx.runtime.release_context(fx.context).unwrap_err();
    assert!(matches!(err, ClError::ContextInUse(2)));
    assert_eq!(err.code(), CL_INVALID_OPERATION);
    assert_eq!(context_refs(&fx), before);
    assert!(fx.runtime.is_live(fx.queue));

    fx.runtime.release_mem_object(mem).unwrap();
    fx.runtime.release_command_queue(fx.queue).unwrap();
    fx.runtime.release_context(fx.context).unwrap();
    assert!(!fx.runtime.is_live(fx.context));
}

#[test]
fn test_extra_references_release_without_children_check() {
    let fx = Fixture::new();
    fx.runtime.retain_context(fx.context).unwrap();
    fx.runtime.release_context(fx.context).unwrap();
    assert!(fx.runtime.is_live(fx.context));
    assert!(fx.runtime.is_live(fx.queue));
}

#[test]
fn test_cascade_policy_destroys_children() {
    let fx = Fixture::with_policy(ContextReleasePolicy::Cascade);
    let mem = fx.buffer_from(&[7u8; 64]);
    let program = fx.program("__kernel void k(__global int* x) { x[0] = 1; }");
    let kernel = fx.runtime.create_kernel(program, "k").unwrap();
    let user = fx.runtime.create_user_event(fx.context).unwrap();

    fx.runtime.release_context(fx.context).unwrap();

    assert!(!fx.runtime.is_live(fx.context));
    assert!(!fx.runtime.is_live(fx.queue));
    assert!(!fx.runtime.is_live(mem));
    assert!(!fx.runtime.is_live(program));
    assert!(!fx.runtime.is_live(kernel));
    // events are not owned by their context
    assert!(fx.runtime.is_live(user));
    fx.runtime.release_event(user).unwrap();
}

#[test]
fn test_cascade_release_leaves_gated_work_running() {
    let fx = Fixture::with_policy(ContextReleasePolicy::Cascade);
    let mem = fx.buffer(1024);
    let gate = fx.runtime.create_user_event(fx.context).unwrap();
    let write = fx
        .runtime
        .enqueue_write_buffer(fx.queue, mem, false, 0, &[1u8; 1024], &[gate])
        .unwrap();

    // returns while the write still waits on the gate
    fx.runtime.release_context(fx.context).unwrap();
    assert!(!fx.runtime.is_live(fx.queue));
    assert!(!fx.runtime.event_status(write).unwrap().is_terminal());

    fx.runtime.set_user_event_status(gate, CL_COMPLETE).unwrap();
    fx.runtime.wait_for_events(&[write]).unwrap();
    assert_eq!(fx.runtime.event_status(write).unwrap(), EventStatus::Complete);
    fx.runtime.release_event(write).unwrap();
    fx.runtime.release_event(gate).unwrap();
}

#[test]
fn test_release_queue_with_gated_work_returns() {
    let fx = Fixture::new();
    let mem = fx.buffer(256);
    let gate = fx.runtime.create_user_event(fx.context).unwrap();
    let write = fx
        .runtime
        .enqueue_write_buffer(fx.queue, mem, false, 0, &[0x5A; 256], &[gate])
        .unwrap();

    let released = std::thread::scope(|s| {
        let (tx, rx) = mpsc::channel();
        let (runtime, queue) = (&fx.runtime, fx.queue);
        s.spawn(move || {
            let _ = tx.send(runtime.release_command_queue(queue));
        });
        let released = rx.recv_timeout(Duration::from_secs(5));
        // open the gate either way so a stuck release cannot hang the test
        fx.runtime.set_user_event_status(gate, CL_COMPLETE).unwrap();
        released
    });
    assert_eq!(released, Ok(Ok(())));
    assert!(!fx.runtime.is_live(fx.queue));

    fx.runtime.wait_for_events(&[write]).unwrap();
    let queue = fx
        .runtime
        .create_command_queue(fx.context, fx.device, 0)
        .unwrap();
    let mut out = vec![0u8; 256];
    let read = fx
        .runtime
        .enqueue_read_buffer(queue, mem, 0, &mut out, &[])
        .unwrap();
    assert!(out.iter().all(|&b| b == 0x5A));

    for event in [write, read, gate] {
        fx.runtime.release_event(event).unwrap();
    }
    fx.runtime.release_command_queue(queue).unwrap();
}

#[test]
fn test_creation_racing_release_never_orphans_a_child() {
    let runtime = common::runtime_with(ContextReleasePolicy::Strict);
    let platform = runtime.platform_ids()[0];
    let device = runtime.device_ids(platform, CL_DEVICE_TYPE_ALL).unwrap()[0];

    for _ in 0..200 {
        let context = runtime.create_context(&[device]).unwrap();
        let (created, released) = std::thread::scope(|s| {
            let creator =
                s.spawn(|| runtime.create_buffer(context, CL_MEM_READ_WRITE, 1 << 20, None));
            let released = runtime.release_context(context);
            (creator.join().unwrap(), released)
        });
        match (created, released) {
            (Ok(mem), Err(ClError::ContextInUse(1))) => {
                let owner = runtime.mem_info(mem, CL_MEM_CONTEXT).unwrap().as_handle();
                assert_eq!(owner, Some(context.raw()));
                runtime.release_mem_object(mem).unwrap();
                runtime.release_context(context).unwrap();
            }
            (Err(ClError::InvalidContext | ClError::InvalidHandle(HandleKind::Context)), Ok(())) => {}
            (created, released) => {
                panic!("create {:?} raced release {:?}", created, released)
            }
        }
        assert!(!runtime.is_live(context));
    }
}
