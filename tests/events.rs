//! Event dependencies across queues

mod common;

use std::time::Duration;

use clmetal::*;
use common::Fixture;

#[test]
fn test_user_event_gates_another_queue() {
    let fx = Fixture::new();
    let second = fx
        .runtime
        .create_command_queue(fx.context, fx.device, 0)
        .unwrap();
    let mem = fx.buffer_from(&[0u8; 16]);
    let gate = fx.runtime.create_user_event(fx.context).unwrap();

    let write = fx
        .runtime
        .enqueue_write_buffer(fx.queue, mem, false, 0, &[9u8; 16], &[gate])
        .unwrap();
    let read = fx
        .runtime
        .enqueue_read_buffer_async(second, mem, 0, 16, &[write])
        .unwrap();

    std::thread::sleep(Duration::from_millis(20));
    assert!(!fx.runtime.event_status(write).unwrap().is_terminal());
    assert!(!read.is_complete());

    fx.runtime.set_user_event_status(gate, CL_COMPLETE).unwrap();
    assert_eq!(read.wait().unwrap(), vec![9u8; 16]);
    assert_eq!(fx.runtime.event_status(write).unwrap(), EventStatus::Complete);
}

#[test]
fn test_failure_propagates_through_dependencies() {
    let fx = Fixture::new();
    let second = fx
        .runtime
        .create_command_queue(fx.context, fx.device, 0)
        .unwrap();
    let mem = fx.buffer_from(&[1u8; 16]);
    let gate = fx.runtime.create_user_event(fx.context).unwrap();

    let write = fx
        .runtime
        .enqueue_write_buffer(fx.queue, mem, false, 0, &[2u8; 16], &[gate])
        .unwrap();
    let marker = fx
        .runtime
        .enqueue_marker_with_wait_list(second, &[write])
        .unwrap();
    fx.runtime
        .set_user_event_status(gate, CL_OUT_OF_RESOURCES)
        .unwrap();

    assert_eq!(
        fx.runtime.wait_for_events(&[marker]).unwrap_err(),
        ClError::ExecStatusErrorForEventsInWaitList
    );
    let status = |e| fx.runtime.event_status(e).unwrap();
    assert_eq!(
        status(write),
        EventStatus::Error(CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST)
    );
    assert_eq!(
        status(marker),
        EventStatus::Error(CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST)
    );
    // the skipped write left the buffer alone
    assert_eq!(fx.read(mem, 16), vec![1u8; 16]);
}

#[test]
fn test_user_event_status_is_set_once() {
    let fx = Fixture::new();
    let gate = fx.runtime.create_user_event(fx.context).unwrap();
    assert_eq!(fx.runtime.event_status(gate).unwrap(), EventStatus::Submitted);
    fx.runtime.set_user_event_status(gate, CL_COMPLETE).unwrap();
    let err = fx
        .runtime
        .set_user_event_status(gate, CL_COMPLETE)
        .unwrap_err();
    assert_eq!(err.code(), CL_INVALID_OPERATION);
}

#[test]
fn test_wait_list_from_other_context_is_rejected() {
    let fx = Fixture::new();
    let other = fx.runtime.create_context(&[fx.device]).unwrap();
    let foreign = fx.runtime.create_user_event(other).unwrap();
    let err = fx
        .runtime
        .enqueue_marker_with_wait_list(fx.queue, &[foreign])
        .unwrap_err();
    assert_eq!(err.code(), CL_INVALID_CONTEXT);
}

#[test]
fn test_profiling_timestamps() {
    let fx = Fixture::new();
    let queue = fx
        .runtime
        .create_command_queue(fx.context, fx.device, CL_QUEUE_PROFILING_ENABLE)
        .unwrap();
    let mem = fx.buffer(64);
    let fill = fx
        .runtime
        .enqueue_fill_buffer(queue, mem, &[1], 0, 64, &[])
        .unwrap();
    fx.runtime.wait_for_events(&[fill]).unwrap();

    let stamps: Vec<u64> = [
        CL_PROFILING_COMMAND_QUEUED,
        CL_PROFILING_COMMAND_SUBMIT,
        CL_PROFILING_COMMAND_START,
        CL_PROFILING_COMMAND_END,
    ]
    .into_iter()
    .map(|p| fx.runtime.event_profiling_info(fill, p).unwrap())
    .collect();
    assert!(stamps.windows(2).all(|w| w[0] <= w[1]));

    // a queue without profiling has no timestamps
    let plain = fx
        .runtime
        .enqueue_marker_with_wait_list(fx.queue, &[])
        .unwrap();
    fx.runtime.wait_for_events(&[plain]).unwrap();
    assert_eq!(
        fx.runtime
            .event_profiling_info(plain, CL_PROFILING_COMMAND_END)
            .unwrap_err()
            .code(),
        CL_PROFILING_INFO_NOT_AVAILABLE
    );
}
