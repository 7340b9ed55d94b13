//! Command queues
//!
//! Every queue owns one worker thread fed through a channel. The worker runs
//! submissions strictly in order: it first blocks on the submission's wait
//! list, then executes the command against the native queue and moves the
//! event to its terminal state. Dropping the sender lets the worker drain
//! whatever is still pending before it exits, which is how release and
//! context teardown stop a queue.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use log::{debug, info, trace, warn};

use super::Runtime;
use super::context::Context;
use super::event::{Event, EventStatus};
use super::memory::Buffer;
use super::platform::Device;
use crate::backend::{Binding, ComputePipeline, DispatchGrid, NativeQueue};
use crate::error::{ClError, Result};
use crate::handle::{ContextId, DeviceId, EventId, Handle, MemId, QueueId};
use crate::info::InfoValue;
use crate::types::*;

const KNOWN_PROPERTIES: cl_command_queue_properties =
    CL_QUEUE_OUT_OF_ORDER_EXEC_MODE_ENABLE | CL_QUEUE_PROFILING_ENABLE;

/// Destination of a read that goes straight to caller memory
pub(crate) struct HostPtr(*mut u8);

// Safety: the pointer is only dereferenced by the worker, and the raw read
// entry points require the memory to stay valid until the command completes.
unsafe impl Send for HostPtr {}

pub(crate) type ReadSlot = Arc<Mutex<Option<Vec<u8>>>>;

/// Work executed by a queue's worker
pub(crate) enum Command {
    Write {
        buffer: Arc<Buffer>,
        offset: usize,
        data: Vec<u8>,
    },
    Read {
        buffer: Arc<Buffer>,
        offset: usize,
        len: usize,
        slot: ReadSlot,
    },
    ReadRaw {
        buffer: Arc<Buffer>,
        offset: usize,
        len: usize,
        dst: HostPtr,
    },
    Copy {
        src: Arc<Buffer>,
        dst: Arc<Buffer>,
        src_offset: usize,
        dst_offset: usize,
        len: usize,
    },
    Fill {
        buffer: Arc<Buffer>,
        offset: usize,
        len: usize,
        pattern: Vec<u8>,
    },
    Dispatch {
        name: String,
        pipeline: Arc<dyn ComputePipeline>,
        bindings: Vec<Binding>,
        grid: DispatchGrid,
    },
    /// Markers and barriers; ordering alone gives them their meaning
    Marker,
}

impl Command {
    fn execute(self, native: &dyn NativeQueue) -> Result<()> {
        match self {
            Command::Write {
                buffer,
                offset,
                data,
            } => buffer.native().write(offset, &data)?,
            Command::Read {
                buffer,
                offset,
                len,
                slot,
            } => {
                let mut bytes = vec![0u8; len];
                buffer.native().read(offset, &mut bytes)?;
                *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(bytes);
            }
            Command::ReadRaw {
                buffer,
                offset,
                len,
                dst,
            } => {
                // Safety: guaranteed by the caller of the raw read entry point.
                let dst = unsafe { std::slice::from_raw_parts_mut(dst.0, len) };
                buffer.native().read(offset, dst)?;
            }
            Command::Copy {
                src,
                dst,
                src_offset,
                dst_offset,
                len,
            } => {
                let mut bytes = vec![0u8; len];
                src.native().read(src_offset, &mut bytes)?;
                dst.native().write(dst_offset, &bytes)?;
            }
            Command::Fill {
                buffer,
                offset,
                len,
                pattern,
            } => {
                let bytes: Vec<u8> = pattern.iter().copied().cycle().take(len).collect();
                buffer.native().write(offset, &bytes)?;
            }
            Command::Dispatch {
                name,
                pipeline,
                bindings,
                grid,
            } => {
                trace!(
                    "dispatching '{}' over {:?} in groups of {:?}",
                    name, grid.global_size, grid.local_size
                );
                native.dispatch(pipeline.as_ref(), &bindings, &grid)?;
            }
            Command::Marker => {}
        }
        Ok(())
    }
}

struct Submission {
    command: Command,
    event: Arc<Event>,
    wait: Vec<Arc<Event>>,
}

impl Submission {
    fn run(self, native: &dyn NativeQueue) {
        let Submission {
            command,
            event,
            wait,
        } = self;
        event.transition(EventStatus::Submitted);
        for dependency in &wait {
            if let EventStatus::Error(code) = dependency.wait() {
                debug!("skipping command: a dependency failed with {}", code);
                event.transition(EventStatus::Error(
                    CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST,
                ));
                return;
            }
        }
        event.transition(EventStatus::Running);
        match command.execute(native) {
            Ok(()) => {
                event.transition(EventStatus::Complete);
            }
            Err(e) => {
                warn!("command {:#x} failed: {}", event.command_type(), e);
                event.transition(EventStatus::Error(e.code()));
            }
        }
    }
}

fn run_worker(id: QueueId, native: Arc<dyn NativeQueue>, submissions: Receiver<Submission>) {
    for submission in submissions {
        submission.run(native.as_ref());
    }
    debug!("Queue {:?} drained, worker exiting", id);
}

/// An in-order command queue on one device of a context
pub struct Queue {
    id: QueueId,
    context_id: ContextId,
    context: Arc<Context>,
    device_id: DeviceId,
    properties: cl_command_queue_properties,
    sender: Mutex<Option<Sender<Submission>>>,
}

impl Queue {
    pub fn context_id(&self) -> ContextId {
        self.context_id
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    pub fn properties(&self) -> cl_command_queue_properties {
        self.properties
    }

    pub(crate) fn context(&self) -> &Arc<Context> {
        &self.context
    }

    pub(crate) fn device(&self) -> Result<&Arc<Device>> {
        self.context
            .device(self.device_id)
            .ok_or(ClError::InvalidDevice)
    }

    fn profiling(&self) -> bool {
        self.properties & CL_QUEUE_PROFILING_ENABLE != 0
    }

    fn sender(&self) -> MutexGuard<'_, Option<Sender<Submission>>> {
        self.sender.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hand a command to the worker; the returned event starts `Queued`
    pub(crate) fn submit(
        &self,
        command_type: cl_command_type,
        command: Command,
        wait: Vec<Arc<Event>>,
    ) -> Result<Arc<Event>> {
        let event = Arc::new(Event::command(
            self.context_id,
            self.id,
            command_type,
            self.profiling(),
        ));
        let submission = Submission {
            command,
            event: event.clone(),
            wait,
        };
        let sender = self.sender();
        let sent = match sender.as_ref() {
            Some(tx) => tx.send(submission).is_ok(),
            None => false,
        };
        if !sent {
            return Err(ClError::InvalidHandle(QueueId::KIND));
        }
        Ok(event)
    }

    /// Stop accepting work
    ///
    /// The worker keeps draining what is already queued, including commands
    /// still gated on unsignalled events, and exits on its own once the
    /// channel is empty. Nothing here waits for it.
    pub(crate) fn shutdown(&self) {
        if self.sender().take().is_some() {
            debug!("Queue {:?} stopped accepting work", self.id);
        }
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A non-blocking read whose bytes become available once its event completes
pub struct PendingRead {
    event_id: EventId,
    event: Arc<Event>,
    slot: ReadSlot,
}

impl PendingRead {
    /// Event of the read; owned by the caller like any other enqueue event
    pub fn event(&self) -> EventId {
        self.event_id
    }

    pub fn is_complete(&self) -> bool {
        self.event.status().is_terminal()
    }

    /// Block until the read finished and take the bytes
    pub fn wait(self) -> Result<Vec<u8>> {
        if let EventStatus::Error(code) = self.event.wait() {
            return Err(status_error(code));
        }
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| ClError::invalid_operation("read result already taken"))
    }
}

/// Error returned by a blocking call whose command ended with `code`
fn status_error(code: cl_int) -> ClError {
    match code {
        CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST => ClError::ExecStatusErrorForEventsInWaitList,
        CL_MEM_OBJECT_ALLOCATION_FAILURE => {
            ClError::MemObjectAllocationFailure("command failed".to_string())
        }
        other => ClError::OutOfResources(format!("command failed with status {}", other)),
    }
}

impl Runtime {
    /// Create an in-order queue on `device`, which must belong to `context`
    pub fn create_command_queue(
        &self,
        context: ContextId,
        device: DeviceId,
        properties: cl_command_queue_properties,
    ) -> Result<QueueId> {
        let ctx = self.resolve::<Context>(context)?;
        let dev = ctx.device(device).ok_or(ClError::InvalidDevice)?.clone();
        if properties & !KNOWN_PROPERTIES != 0 {
            return Err(ClError::invalid_value(format!(
                "unknown queue properties {:#x}",
                properties
            )));
        }
        if properties & CL_QUEUE_OUT_OF_ORDER_EXEC_MODE_ENABLE != 0 {
            return Err(ClError::InvalidQueueProperties);
        }
        let native = dev.native().new_command_queue()?;

        let id = self.registry.reserve::<QueueId>();
        let (sender, receiver) = mpsc::channel();
        // the worker is detached and exits once the queue drops its sender
        thread::Builder::new()
            .name(format!("clmetal-queue-{}", id.raw()))
            .spawn(move || run_worker(id, native, receiver))
            .map_err(|e| ClError::OutOfResources(format!("cannot spawn queue worker: {}", e)))?;

        self.registry.insert_child_at(
            id,
            Arc::new(Queue {
                id,
                context_id: context,
                context: ctx,
                device_id: device,
                properties,
                sender: Mutex::new(Some(sender)),
            }),
        )?;
        info!(
            "Created queue {:?} on '{}' (properties {:#x})",
            id,
            dev.descriptor().name,
            properties
        );
        Ok(id)
    }

    pub fn retain_command_queue(&self, queue: QueueId) -> Result<()> {
        self.registry.retain::<Queue>(queue)
    }

    /// Release a queue
    ///
    /// The last release stops the queue from accepting commands. Work already
    /// enqueued still runs in order in the background, so this never waits on
    /// an event.
    pub fn release_command_queue(&self, queue: QueueId) -> Result<()> {
        self.release::<Queue>(queue)
    }

    pub fn queue_info(&self, queue: QueueId, param: cl_command_queue_info) -> Result<InfoValue> {
        let q = self.resolve::<Queue>(queue)?;
        Ok(match param {
            CL_QUEUE_CONTEXT => InfoValue::Handle(q.context_id.raw()),
            CL_QUEUE_DEVICE => InfoValue::Handle(q.device_id.raw()),
            CL_QUEUE_REFERENCE_COUNT => InfoValue::Uint(self.registry.ref_count::<Queue>(queue)?),
            CL_QUEUE_PROPERTIES => InfoValue::Bitfield(q.properties),
            other => return Err(ClError::AttributeNotSupported(other)),
        })
    }

    /// Submit `command` on `queue` and register its event for the caller
    pub(crate) fn submit_command(
        &self,
        queue: &Queue,
        command_type: cl_command_type,
        command: Command,
        wait: Vec<Arc<Event>>,
    ) -> Result<(EventId, Arc<Event>)> {
        let event = queue.submit(command_type, command, wait)?;
        let id = self.registry.insert(event.clone());
        trace!("enqueued command {:#x} as {:?}", command_type, id);
        Ok((id, event))
    }

    /// Wait for a caller-owned event; on failure the event is released
    fn complete_blocking(&self, id: EventId, event: &Event) -> Result<EventId> {
        match event.wait() {
            EventStatus::Error(code) => {
                self.release_event(id)?;
                Err(status_error(code))
            }
            _ => Ok(id),
        }
    }

    /// Resolve a buffer of the queue's context and check the region
    fn queue_buffer(&self, queue: &Queue, mem: MemId, offset: usize, len: usize) -> Result<Arc<Buffer>> {
        let buffer = self.resolve::<Buffer>(mem)?;
        if buffer.context_id() != queue.context_id {
            return Err(ClError::InvalidContext);
        }
        if len == 0 {
            return Err(ClError::invalid_value("transfer of zero bytes"));
        }
        buffer.check_region(offset, len)?;
        Ok(buffer)
    }

    /// Write `data` into `mem` at `offset`
    ///
    /// The bytes are copied at enqueue time, so `data` may be reused as soon
    /// as this returns even when `blocking` is false.
    pub fn enqueue_write_buffer(
        &self,
        queue: QueueId,
        mem: MemId,
        blocking: bool,
        offset: usize,
        data: &[u8],
        wait_list: &[EventId],
    ) -> Result<EventId> {
        let q = self.resolve::<Queue>(queue)?;
        let buffer = self.queue_buffer(&q, mem, offset, data.len())?;
        let wait = self.resolve_wait_list(q.context_id, wait_list)?;
        let command = Command::Write {
            buffer,
            offset,
            data: data.to_vec(),
        };
        let (id, event) = self.submit_command(&q, CL_COMMAND_WRITE_BUFFER, command, wait)?;
        if blocking {
            return self.complete_blocking(id, &event);
        }
        Ok(id)
    }

    /// Start reading `len` bytes of `mem` without blocking
    pub fn enqueue_read_buffer_async(
        &self,
        queue: QueueId,
        mem: MemId,
        offset: usize,
        len: usize,
        wait_list: &[EventId],
    ) -> Result<PendingRead> {
        let q = self.resolve::<Queue>(queue)?;
        let buffer = self.queue_buffer(&q, mem, offset, len)?;
        let wait = self.resolve_wait_list(q.context_id, wait_list)?;
        let slot = ReadSlot::default();
        let command = Command::Read {
            buffer,
            offset,
            len,
            slot: slot.clone(),
        };
        let (event_id, event) = self.submit_command(&q, CL_COMMAND_READ_BUFFER, command, wait)?;
        Ok(PendingRead {
            event_id,
            event,
            slot,
        })
    }

    /// Read `dst.len()` bytes of `mem` at `offset` and block until done
    pub fn enqueue_read_buffer(
        &self,
        queue: QueueId,
        mem: MemId,
        offset: usize,
        dst: &mut [u8],
        wait_list: &[EventId],
    ) -> Result<EventId> {
        let pending = self.enqueue_read_buffer_async(queue, mem, offset, dst.len(), wait_list)?;
        let id = pending.event();
        match pending.wait() {
            Ok(bytes) => {
                dst.copy_from_slice(&bytes);
                Ok(id)
            }
            Err(e) => {
                self.release_event(id)?;
                Err(e)
            }
        }
    }

    /// Read into caller memory, as the C API does
    ///
    /// # Safety
    ///
    /// `dst` must be valid for writes of `len` bytes until the returned event
    /// is terminal (until this call returns when `blocking` is true).
    #[allow(clippy::too_many_arguments)]
    pub unsafe fn enqueue_read_buffer_raw(
        &self,
        queue: QueueId,
        mem: MemId,
        blocking: bool,
        offset: usize,
        len: usize,
        dst: *mut u8,
        wait_list: &[EventId],
    ) -> Result<EventId> {
        if dst.is_null() {
            return Err(ClError::invalid_value("null destination pointer"));
        }
        let q = self.resolve::<Queue>(queue)?;
        let buffer = self.queue_buffer(&q, mem, offset, len)?;
        let wait = self.resolve_wait_list(q.context_id, wait_list)?;
        let command = Command::ReadRaw {
            buffer,
            offset,
            len,
            dst: HostPtr(dst),
        };
        let (id, event) = self.submit_command(&q, CL_COMMAND_READ_BUFFER, command, wait)?;
        if blocking {
            return self.complete_blocking(id, &event);
        }
        Ok(id)
    }

    /// Copy `len` bytes between two buffers of the queue's context
    #[allow(clippy::too_many_arguments)]
    pub fn enqueue_copy_buffer(
        &self,
        queue: QueueId,
        src: MemId,
        dst: MemId,
        src_offset: usize,
        dst_offset: usize,
        len: usize,
        wait_list: &[EventId],
    ) -> Result<EventId> {
        let q = self.resolve::<Queue>(queue)?;
        let src_buffer = self.queue_buffer(&q, src, src_offset, len)?;
        let dst_buffer = self.queue_buffer(&q, dst, dst_offset, len)?;
        if src == dst && src_offset < dst_offset + len && dst_offset < src_offset + len {
            return Err(ClError::MemCopyOverlap);
        }
        let wait = self.resolve_wait_list(q.context_id, wait_list)?;
        let command = Command::Copy {
            src: src_buffer,
            dst: dst_buffer,
            src_offset,
            dst_offset,
            len,
        };
        Ok(self
            .submit_command(&q, CL_COMMAND_COPY_BUFFER, command, wait)?
            .0)
    }

    /// Fill `len` bytes at `offset` with a repeated `pattern`
    pub fn enqueue_fill_buffer(
        &self,
        queue: QueueId,
        mem: MemId,
        pattern: &[u8],
        offset: usize,
        len: usize,
        wait_list: &[EventId],
    ) -> Result<EventId> {
        let q = self.resolve::<Queue>(queue)?;
        let p = pattern.len();
        if !(1..=128).contains(&p) || !p.is_power_of_two() {
            return Err(ClError::invalid_value(format!(
                "fill pattern of {} bytes",
                p
            )));
        }
        if offset % p != 0 || len % p != 0 {
            return Err(ClError::invalid_value(
                "fill offset and size must be multiples of the pattern size",
            ));
        }
        let buffer = self.queue_buffer(&q, mem, offset, len)?;
        let wait = self.resolve_wait_list(q.context_id, wait_list)?;
        let command = Command::Fill {
            buffer,
            offset,
            len,
            pattern: pattern.to_vec(),
        };
        Ok(self
            .submit_command(&q, CL_COMMAND_FILL_BUFFER, command, wait)?
            .0)
    }

    /// An event that completes after `wait_list`, or after all prior work
    pub fn enqueue_marker_with_wait_list(
        &self,
        queue: QueueId,
        wait_list: &[EventId],
    ) -> Result<EventId> {
        let q = self.resolve::<Queue>(queue)?;
        let wait = self.resolve_wait_list(q.context_id, wait_list)?;
        Ok(self
            .submit_command(&q, CL_COMMAND_MARKER, Command::Marker, wait)?
            .0)
    }

    /// Like a marker; the queue is in-order so later commands already wait
    pub fn enqueue_barrier_with_wait_list(
        &self,
        queue: QueueId,
        wait_list: &[EventId],
    ) -> Result<EventId> {
        let q = self.resolve::<Queue>(queue)?;
        let wait = self.resolve_wait_list(q.context_id, wait_list)?;
        Ok(self
            .submit_command(&q, CL_COMMAND_BARRIER, Command::Marker, wait)?
            .0)
    }

    /// Commands are handed to the worker on enqueue; nothing to flush
    pub fn flush(&self, queue: QueueId) -> Result<()> {
        self.resolve::<Queue>(queue)?;
        trace!("flush {:?}", queue);
        Ok(())
    }

    /// Block until everything enqueued on `queue` so far is terminal
    pub fn finish(&self, queue: QueueId) -> Result<()> {
        let q = self.resolve::<Queue>(queue)?;
        let marker = q.submit(CL_COMMAND_MARKER, Command::Marker, Vec::new())?;
        marker.wait();
        debug!("Queue {:?} finished", queue);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::tests::host_runtime;
    use std::time::Duration;

    struct Fixture {
        runtime: Runtime,
        context: ContextId,
        queue: QueueId,
    }

    fn fixture(properties: cl_command_queue_properties) -> Fixture {
        let runtime = host_runtime();
        let context = runtime.create_context_from_type(CL_DEVICE_TYPE_ALL).unwrap();
        let device = runtime.context_info(context, CL_CONTEXT_DEVICES).unwrap();
        let device = DeviceId::from_raw(device.as_handles().unwrap()[0]).unwrap();
        let queue = runtime
            .create_command_queue(context, device, properties)
            .unwrap();
        Fixture {
            runtime,
            context,
            queue,
        }
    }

    #[test]
    fn test_queue_properties() {
        let f = fixture(0);
        let device = DeviceId::from_raw(
            f.runtime
                .queue_info(f.queue, CL_QUEUE_DEVICE)
                .unwrap()
                .as_handle()
                .unwrap(),
        )
        .unwrap();
        assert_eq!(
            f.runtime
                .create_command_queue(f.context, device, CL_QUEUE_OUT_OF_ORDER_EXEC_MODE_ENABLE)
                .err(),
            Some(ClError::InvalidQueueProperties)
        );
        assert_eq!(
            f.runtime
                .create_command_queue(f.context, device, 1 << 9)
                .unwrap_err()
                .code(),
            CL_INVALID_VALUE
        );
        let bogus = DeviceId::from_raw(f.context.raw()).unwrap();
        assert_eq!(
            f.runtime.create_command_queue(f.context, bogus, 0).err(),
            Some(ClError::InvalidDevice)
        );
        assert_eq!(
            f.runtime
                .queue_info(f.queue, CL_QUEUE_CONTEXT)
                .unwrap()
                .as_handle(),
            Some(f.context.raw())
        );
    }

    #[test]
    fn test_write_then_read() {
        let f = fixture(0);
        let mem = f.runtime.create_buffer(f.context, 0, 16, None).unwrap();
        let data: Vec<u8> = (0..16).collect();
        let write = f
            .runtime
            .enqueue_write_buffer(f.queue, mem, false, 0, &data, &[])
            .unwrap();
        let mut out = [0u8; 8];
        let read = f
            .runtime
            .enqueue_read_buffer(f.queue, mem, 8, &mut out, &[write])
            .unwrap();
        assert_eq!(out, [8, 9, 10, 11, 12, 13, 14, 15]);
        assert_eq!(f.runtime.event_status(write).unwrap(), EventStatus::Complete);
        f.runtime.release_event(write).unwrap();
        f.runtime.release_event(read).unwrap();
    }

    #[test]
    fn test_transfer_bounds() {
        let f = fixture(0);
        let mem = f.runtime.create_buffer(f.context, 0, 16, None).unwrap();
        let mut out = [0u8; 8];
        assert_eq!(
            f.runtime
                .enqueue_read_buffer(f.queue, mem, 12, &mut out, &[])
                .unwrap_err()
                .code(),
            CL_INVALID_VALUE
        );
        assert_eq!(
            f.runtime
                .enqueue_write_buffer(f.queue, mem, true, 0, &[], &[])
                .unwrap_err()
                .code(),
            CL_INVALID_VALUE
        );
        let unknown = EventId::from_raw(9999).unwrap();
        assert_eq!(
            f.runtime
                .enqueue_write_buffer(f.queue, mem, true, 0, &[1], &[unknown])
                .err(),
            Some(ClError::InvalidEventWaitList)
        );
    }

    #[test]
    fn test_fill_and_copy() {
        let f = fixture(0);
        let a = f.runtime.create_buffer(f.context, 0, 16, None).unwrap();
        let b = f.runtime.create_buffer(f.context, 0, 16, None).unwrap();
        f.runtime
            .enqueue_fill_buffer(f.queue, a, &[0xAB, 0xCD], 0, 16, &[])
            .unwrap();
        f.runtime
            .enqueue_copy_buffer(f.queue, a, b, 4, 0, 8, &[])
            .unwrap();
        let mut out = [0u8; 16];
        f.runtime
            .enqueue_read_buffer(f.queue, b, 0, &mut out, &[])
            .unwrap();
        assert_eq!(&out[..8], &[0xAB, 0xCD, 0xAB, 0xCD, 0xAB, 0xCD, 0xAB, 0xCD]);
        assert_eq!(&out[8..], &[0; 8]);

        assert_eq!(
            f.runtime
                .enqueue_copy_buffer(f.queue, a, a, 0, 4, 8, &[])
                .err(),
            Some(ClError::MemCopyOverlap)
        );
        f.runtime
            .enqueue_copy_buffer(f.queue, a, a, 0, 8, 8, &[])
            .unwrap();
        assert_eq!(
            f.runtime
                .enqueue_fill_buffer(f.queue, a, &[1, 2, 3], 0, 6, &[])
                .unwrap_err()
                .code(),
            CL_INVALID_VALUE
        );
        assert_eq!(
            f.runtime
                .enqueue_fill_buffer(f.queue, a, &[1, 2], 1, 4, &[])
                .unwrap_err()
                .code(),
            CL_INVALID_VALUE
        );
        f.runtime.finish(f.queue).unwrap();
    }

    #[test]
    fn test_user_event_gates_the_queue() {
        let f = fixture(0);
        let mem = f.runtime.create_buffer(f.context, 0, 4, None).unwrap();
        let gate = f.runtime.create_user_event(f.context).unwrap();
        let write = f
            .runtime
            .enqueue_write_buffer(f.queue, mem, false, 0, &[1, 2, 3, 4], &[gate])
            .unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert!(!f.runtime.event_status(write).unwrap().is_terminal());
        f.runtime.set_user_event_status(gate, CL_COMPLETE).unwrap();
        f.runtime.wait_for_events(&[write]).unwrap();
        let pending = f
            .runtime
            .enqueue_read_buffer_async(f.queue, mem, 0, 4, &[])
            .unwrap();
        assert_eq!(pending.wait().unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_failed_dependency_skips_command() {
        let f = fixture(0);
        let mem = f.runtime.create_buffer(f.context, 0, 4, None).unwrap();
        let gate = f.runtime.create_user_event(f.context).unwrap();
        let write = f
            .runtime
            .enqueue_write_buffer(f.queue, mem, false, 0, &[9; 4], &[gate])
            .unwrap();
        f.runtime.set_user_event_status(gate, -1).unwrap();
        assert_eq!(
            f.runtime.wait_for_events(&[write]).err(),
            Some(ClError::ExecStatusErrorForEventsInWaitList)
        );
        assert_eq!(
            f.runtime.event_status(write).unwrap(),
            EventStatus::Error(CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST)
        );
        let mut out = [0u8; 4];
        f.runtime
            .enqueue_read_buffer(f.queue, mem, 0, &mut out, &[])
            .unwrap();
        assert_eq!(out, [0; 4]);
    }

    #[test]
    fn test_profiling_timestamps_are_ordered() {
        let f = fixture(CL_QUEUE_PROFILING_ENABLE);
        let marker = f.runtime.enqueue_marker_with_wait_list(f.queue, &[]).unwrap();
        f.runtime.finish(f.queue).unwrap();
        let stamps: Vec<u64> = [
            CL_PROFILING_COMMAND_QUEUED,
            CL_PROFILING_COMMAND_SUBMIT,
            CL_PROFILING_COMMAND_START,
            CL_PROFILING_COMMAND_END,
        ]
        .into_iter()
        .map(|p| f.runtime.event_profiling_info(marker, p).unwrap())
        .collect();
        assert!(stamps.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(
            f.runtime
                .event_info(marker, CL_EVENT_COMMAND_QUEUE)
                .unwrap()
                .as_handle(),
            Some(f.queue.raw())
        );
    }

    #[test]
    fn test_release_drains_pending_work() {
        let f = fixture(0);
        let mem = f.runtime.create_buffer(f.context, 0, 4, None).unwrap();
        let write = f
            .runtime
            .enqueue_write_buffer(f.queue, mem, false, 0, &[5; 4], &[])
            .unwrap();
        f.runtime.release_command_queue(f.queue).unwrap();
        f.runtime.wait_for_events(&[write]).unwrap();
        assert_eq!(f.runtime.event_status(write).unwrap(), EventStatus::Complete);
        assert_eq!(
            f.runtime.flush(f.queue).err(),
            Some(ClError::InvalidHandle(crate::HandleKind::Queue))
        );
    }
}
