//! Buffer transfers through the queue

mod common;

use clmetal::*;
use common::Fixture;
use proptest::prelude::*;

const LEN: usize = 256;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_write_then_read_returns_the_bytes(
        offset in 0..LEN,
        data in proptest::collection::vec(any::<u8>(), 1..LEN),
    ) {
        let len = data.len().min(LEN - offset);
        prop_assume!(len > 0);
        let fx = Fixture::new();
        let mem = fx.buffer_from(&[0u8; LEN]);
        let write = fx
            .runtime
            .enqueue_write_buffer(fx.queue, mem, true, offset, &data[..len], &[])
            .unwrap();
        fx.runtime.release_event(write).unwrap();

        let bytes = fx.read(mem, LEN);
        prop_assert_eq!(&bytes[offset..offset + len], &data[..len]);
        prop_assert!(bytes[..offset].iter().all(|b| *b == 0));
        prop_assert!(bytes[offset + len..].iter().all(|b| *b == 0));
    }

    #[test]
    fn prop_out_of_range_transfers_are_rejected(offset in 0..2 * LEN, len in 1..2 * LEN) {
        prop_assume!(offset + len > LEN);
        let fx = Fixture::new();
        let mem = fx.buffer(LEN);
        let err = fx
            .runtime
            .enqueue_write_buffer(fx.queue, mem, true, offset, &vec![1u8; len], &[])
            .unwrap_err();
        prop_assert_eq!(err.code(), CL_INVALID_VALUE);
    }
}

#[test]
fn test_fill_with_single_byte_pattern() {
    let fx = Fixture::new();
    let mem = fx.buffer(64);
    let fill = fx
        .runtime
        .enqueue_fill_buffer(fx.queue, mem, &[0xAB], 0, 64, &[])
        .unwrap();
    fx.runtime.wait_for_events(&[fill]).unwrap();
    assert_eq!(fx.read(mem, 64), vec![0xAB; 64]);
}

#[test]
fn test_fill_with_word_pattern_in_a_region() {
    let fx = Fixture::new();
    let mem = fx.buffer_from(&[0u8; 32]);
    let pattern = 0xDEAD_BEEFu32.to_ne_bytes();
    fx.runtime
        .enqueue_fill_buffer(fx.queue, mem, &pattern, 8, 16, &[])
        .unwrap();
    let bytes = fx.read(mem, 32);
    assert!(bytes[..8].iter().all(|b| *b == 0));
    for chunk in bytes[8..24].chunks(4) {
        assert_eq!(chunk, pattern);
    }
    assert!(bytes[24..].iter().all(|b| *b == 0));
}

#[test]
fn test_copy_between_buffers() {
    let fx = Fixture::new();
    let src = fx.buffer_from(&(0..64).collect::<Vec<u8>>());
    let dst = fx.buffer_from(&[0u8; 64]);
    fx.runtime
        .enqueue_copy_buffer(fx.queue, src, dst, 16, 0, 32, &[])
        .unwrap();
    let bytes = fx.read(dst, 64);
    assert_eq!(&bytes[..32], &(16..48).collect::<Vec<u8>>()[..]);
    assert!(bytes[32..].iter().all(|b| *b == 0));
}

#[test]
fn test_overlapping_copy_is_rejected() {
    let fx = Fixture::new();
    let mem = fx.buffer(64);
    let err = fx
        .runtime
        .enqueue_copy_buffer(fx.queue, mem, mem, 0, 8, 16, &[])
        .unwrap_err();
    assert_eq!(err, ClError::MemCopyOverlap);
    // disjoint regions of the same buffer are fine
    fx.runtime
        .enqueue_copy_buffer(fx.queue, mem, mem, 0, 32, 16, &[])
        .unwrap();
}

#[test]
fn test_async_read_sees_prior_writes() {
    let fx = Fixture::new();
    let mem = fx.buffer(16);
    fx.runtime
        .enqueue_write_buffer(fx.queue, mem, false, 0, &[5u8; 16], &[])
        .unwrap();
    let pending = fx
        .runtime
        .enqueue_read_buffer_async(fx.queue, mem, 4, 8, &[])
        .unwrap();
    let event = pending.event();
    assert_eq!(pending.wait().unwrap(), vec![5u8; 8]);
    assert_eq!(fx.runtime.event_status(event).unwrap(), EventStatus::Complete);
}

#[test]
fn test_buffer_from_other_context_is_rejected() {
    let fx = Fixture::new();
    let other = fx.runtime.create_context(&[fx.device]).unwrap();
    let foreign = fx
        .runtime
        .create_buffer(other, CL_MEM_READ_WRITE, 16, None)
        .unwrap();
    let err = fx
        .runtime
        .enqueue_write_buffer(fx.queue, foreign, true, 0, &[0u8; 16], &[])
        .unwrap_err();
    assert_eq!(err.code(), CL_INVALID_CONTEXT);
}

#[test]
fn test_non_blocking_pattern_write_then_finish() {
    let fx = Fixture::new();
    let mem = fx.buffer(256);
    let write = fx
        .runtime
        .enqueue_write_buffer(fx.queue, mem, false, 0, &[0xAB; 256], &[])
        .unwrap();
    fx.runtime.finish(fx.queue).unwrap();
    assert_eq!(fx.runtime.event_status(write).unwrap(), EventStatus::Complete);
    assert_eq!(fx.read(mem, 256), vec![0xAB; 256]);
}

#[test]
fn test_use_host_ptr_aliases_caller_memory() {
    let fx = Fixture::new();
    let mut host = vec![0u8; 64];
    let mem = unsafe {
        fx.runtime.create_buffer_raw(
            fx.context,
            CL_MEM_READ_WRITE | CL_MEM_USE_HOST_PTR,
            host.len(),
            host.as_mut_ptr(),
        )
    }
    .unwrap();
    let recorded = fx.runtime.mem_info(mem, CL_MEM_HOST_PTR).unwrap();
    assert_eq!(recorded.as_handle(), Some(host.as_ptr() as usize as u64));

    // which bytes the caller observes between transfers is undefined and
    // left to the caller, so only the transfers themselves are checked
    fx.runtime
        .enqueue_write_buffer(fx.queue, mem, true, 0, &[3u8; 64], &[])
        .unwrap();
    fx.runtime.finish(fx.queue).unwrap();
    fx.runtime.release_mem_object(mem).unwrap();
    drop(host);
}
