//! Events
//!
//! An event moves through `Queued -> Submitted -> Running -> Complete`, or
//! ends in `Error(code)` from any non-terminal state. Updates that would move
//! backwards, or arrive after a terminal state, are ignored. Waiters block on
//! a condition variable that is signalled when the event terminates.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use log::{debug, trace};

use super::Runtime;
use super::context::Context;
use crate::error::{ClError, Result};
use crate::handle::{ContextId, EventId, Handle, QueueId};
use crate::info::InfoValue;
use crate::types::*;

/// Execution status of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    Queued,
    Submitted,
    Running,
    Complete,
    /// Terminated with a negative status code
    Error(cl_int),
}

impl EventStatus {
    /// Legacy `CL_QUEUED`..`CL_COMPLETE` value, or the negative error code
    pub fn code(self) -> cl_int {
        match self {
            EventStatus::Queued => CL_QUEUED,
            EventStatus::Submitted => CL_SUBMITTED,
            EventStatus::Running => CL_RUNNING,
            EventStatus::Complete => CL_COMPLETE,
            EventStatus::Error(code) => code,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, EventStatus::Complete | EventStatus::Error(_))
    }

    fn timestamp_slot(self) -> usize {
        match self {
            EventStatus::Queued => 0,
            EventStatus::Submitted => 1,
            EventStatus::Running => 2,
            EventStatus::Complete | EventStatus::Error(_) => 3,
        }
    }
}

struct EventState {
    status: EventStatus,
    /// Queued, submitted, started and ended timestamps
    times: [Option<Instant>; 4],
}

/// Completion token of one command, or a user event
pub struct Event {
    context_id: ContextId,
    queue: Option<QueueId>,
    command_type: cl_command_type,
    profiling: bool,
    state: Mutex<EventState>,
    cond: Condvar,
}

impl Event {
    fn with_status(
        context_id: ContextId,
        queue: Option<QueueId>,
        command_type: cl_command_type,
        profiling: bool,
        status: EventStatus,
    ) -> Self {
        let mut times = [None; 4];
        times[0] = Some(Instant::now());
        Self {
            context_id,
            queue,
            command_type,
            profiling,
            state: Mutex::new(EventState { status, times }),
            cond: Condvar::new(),
        }
    }

    /// Event of an enqueued command
    pub(crate) fn command(
        context_id: ContextId,
        queue: QueueId,
        command_type: cl_command_type,
        profiling: bool,
    ) -> Self {
        Self::with_status(
            context_id,
            Some(queue),
            command_type,
            profiling,
            EventStatus::Queued,
        )
    }

    pub(crate) fn user(context_id: ContextId) -> Self {
        Self::with_status(
            context_id,
            None,
            CL_COMMAND_USER,
            false,
            EventStatus::Submitted,
        )
    }

    fn lock(&self) -> MutexGuard<'_, EventState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn context_id(&self) -> ContextId {
        self.context_id
    }

    pub fn command_type(&self) -> cl_command_type {
        self.command_type
    }

    pub fn status(&self) -> EventStatus {
        self.lock().status
    }

    /// Move to `status` if that is a forward transition
    ///
    /// Returns whether the transition happened.
    pub(crate) fn transition(&self, status: EventStatus) -> bool {
        let mut state = self.lock();
        let current = state.status;
        let forward = !current.is_terminal()
            && match status {
                EventStatus::Error(_) => true,
                _ => status.code() < current.code(),
            };
        if !forward {
            trace!("ignoring event transition {:?} -> {:?}", current, status);
            return false;
        }
        state.status = status;
        state.times[status.timestamp_slot()] = Some(Instant::now());
        if status.is_terminal() {
            self.cond.notify_all();
        }
        true
    }

    /// Block until the event is terminal and return its final status
    pub(crate) fn wait(&self) -> EventStatus {
        let mut state = self.lock();
        while !state.status.is_terminal() {
            state = self
                .cond
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state.status
    }

    fn profile(&self, slot: usize) -> Result<Instant> {
        let state = self.lock();
        if !self.profiling || state.status != EventStatus::Complete {
            return Err(ClError::ProfilingInfoNotAvailable);
        }
        // a command that skipped a stage reports the previous timestamp
        state.times[..=slot]
            .iter()
            .rev()
            .find_map(|t| *t)
            .ok_or(ClError::ProfilingInfoNotAvailable)
    }
}

impl Runtime {
    /// Resolve a wait list; every event must be live and share `context`
    pub(crate) fn resolve_wait_list(
        &self,
        context: ContextId,
        wait_list: &[EventId],
    ) -> Result<Vec<Arc<Event>>> {
        wait_list
            .iter()
            .map(|id| {
                let event = self
                    .resolve::<Event>(*id)
                    .map_err(|_| ClError::InvalidEventWaitList)?;
                if event.context_id != context {
                    return Err(ClError::InvalidContext);
                }
                Ok(event)
            })
            .collect()
    }

    /// Current status, without blocking
    pub fn event_status(&self, event: EventId) -> Result<EventStatus> {
        Ok(self.resolve::<Event>(event)?.status())
    }

    /// Block until every event in `events` is terminal
    ///
    /// Fails with `ExecStatusErrorForEventsInWaitList` if any of them ended
    /// in error.
    pub fn wait_for_events(&self, events: &[EventId]) -> Result<()> {
        let first = events
            .first()
            .ok_or_else(|| ClError::invalid_value("empty event list"))?;
        let context = self.resolve::<Event>(*first)?.context_id;
        let resolved = events
            .iter()
            .map(|id| {
                let event = self.resolve::<Event>(*id)?;
                if event.context_id != context {
                    return Err(ClError::InvalidContext);
                }
                Ok(event)
            })
            .collect::<Result<Vec<_>>>()?;
        debug!("Waiting for {} event(s)", resolved.len());
        let mut failed = false;
        for event in &resolved {
            failed |= matches!(event.wait(), EventStatus::Error(_));
        }
        if failed {
            return Err(ClError::ExecStatusErrorForEventsInWaitList);
        }
        Ok(())
    }

    /// Create a user event, initially `Submitted`
    pub fn create_user_event(&self, context: ContextId) -> Result<EventId> {
        self.resolve::<Context>(context)?;
        let id = self.registry.insert(Arc::new(Event::user(context)));
        debug!("Created user event {:?}", id);
        Ok(id)
    }

    /// Complete a user event (`CL_COMPLETE`) or fail it (a negative code)
    pub fn set_user_event_status(&self, event: EventId, status: cl_int) -> Result<()> {
        let e = self.resolve::<Event>(event)?;
        if e.command_type != CL_COMMAND_USER {
            return Err(ClError::InvalidHandle(EventId::KIND));
        }
        let status = match status {
            CL_COMPLETE => EventStatus::Complete,
            code if code < 0 => EventStatus::Error(code),
            other => {
                return Err(ClError::invalid_value(format!(
                    "user event status {} is neither CL_COMPLETE nor an error",
                    other
                )));
            }
        };
        if !e.transition(status) {
            return Err(ClError::invalid_operation("user event status already set"));
        }
        debug!("User event {:?} set to {:?}", event, status);
        Ok(())
    }

    pub fn retain_event(&self, event: EventId) -> Result<()> {
        self.registry.retain::<Event>(event)
    }

    pub fn release_event(&self, event: EventId) -> Result<()> {
        self.release::<Event>(event)
    }

    pub fn event_info(&self, event: EventId, param: cl_event_info) -> Result<InfoValue> {
        let e = self.resolve::<Event>(event)?;
        Ok(match param {
            CL_EVENT_COMMAND_QUEUE => InfoValue::Handle(e.queue.map_or(0, Handle::raw)),
            CL_EVENT_CONTEXT => InfoValue::Handle(e.context_id.raw()),
            CL_EVENT_COMMAND_TYPE => InfoValue::Uint(e.command_type),
            CL_EVENT_COMMAND_EXECUTION_STATUS => InfoValue::Int(e.status().code()),
            CL_EVENT_REFERENCE_COUNT => InfoValue::Uint(self.registry.ref_count::<Event>(event)?),
            other => return Err(ClError::AttributeNotSupported(other)),
        })
    }

    /// Profiling timestamp in nanoseconds since the runtime was created
    pub fn event_profiling_info(&self, event: EventId, param: cl_profiling_info) -> Result<u64> {
        let e = self.resolve::<Event>(event)?;
        let slot = match param {
            CL_PROFILING_COMMAND_QUEUED => 0,
            CL_PROFILING_COMMAND_SUBMIT => 1,
            CL_PROFILING_COMMAND_START => 2,
            CL_PROFILING_COMMAND_END => 3,
            other => return Err(ClError::AttributeNotSupported(other)),
        };
        Ok(self.nanos_since_epoch(e.profile(slot)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::tests::host_runtime;
    use std::thread;
    use std::time::Duration;

    fn command_event(profiling: bool) -> Event {
        let context = ContextId::from_raw(1).unwrap();
        let queue = QueueId::from_raw(2).unwrap();
        Event::command(context, queue, CL_COMMAND_MARKER, profiling)
    }

    #[test]
    fn test_transitions_are_monotonic() {
        let event = command_event(false);
        assert_eq!(event.status(), EventStatus::Queued);
        assert!(event.transition(EventStatus::Running));
        assert!(!event.transition(EventStatus::Submitted));
        assert!(event.transition(EventStatus::Complete));
        assert!(!event.transition(EventStatus::Error(-5)));
        assert_eq!(event.status(), EventStatus::Complete);
    }

    #[test]
    fn test_error_is_terminal() {
        let event = command_event(false);
        assert!(event.transition(EventStatus::Error(CL_OUT_OF_RESOURCES)));
        assert!(!event.transition(EventStatus::Complete));
        assert_eq!(event.status().code(), CL_OUT_OF_RESOURCES);
    }

    #[test]
    fn test_wait_wakes_on_completion() {
        let event = Arc::new(command_event(false));
        let signaller = {
            let event = event.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                event.transition(EventStatus::Complete);
            })
        };
        assert_eq!(event.wait(), EventStatus::Complete);
        signaller.join().unwrap();
    }

    #[test]
    fn test_profiling_requires_completion() {
        let event = command_event(true);
        assert_eq!(event.profile(3).err(), Some(ClError::ProfilingInfoNotAvailable));
        event.transition(EventStatus::Submitted);
        event.transition(EventStatus::Running);
        event.transition(EventStatus::Complete);
        let queued = event.profile(0).unwrap();
        let end = event.profile(3).unwrap();
        assert!(end >= queued);

        let plain = command_event(false);
        plain.transition(EventStatus::Complete);
        assert_eq!(plain.profile(0).err(), Some(ClError::ProfilingInfoNotAvailable));
    }

    #[test]
    fn test_user_event_status_rules() {
        let runtime = host_runtime();
        let context = runtime.create_context_from_type(CL_DEVICE_TYPE_ALL).unwrap();
        let event = runtime.create_user_event(context).unwrap();
        assert_eq!(runtime.event_status(event).unwrap(), EventStatus::Submitted);
        assert_eq!(
            runtime.set_user_event_status(event, CL_RUNNING).unwrap_err().code(),
            CL_INVALID_VALUE
        );
        runtime.set_user_event_status(event, CL_COMPLETE).unwrap();
        assert_eq!(
            runtime.set_user_event_status(event, -1).unwrap_err().code(),
            CL_INVALID_OPERATION
        );
        runtime.wait_for_events(&[event]).unwrap();
        assert_eq!(
            runtime
                .event_info(event, CL_EVENT_COMMAND_TYPE)
                .unwrap()
                .as_uint(),
            Some(CL_COMMAND_USER)
        );
        assert_eq!(
            runtime
                .event_info(event, CL_EVENT_COMMAND_QUEUE)
                .unwrap()
                .as_handle(),
            Some(0)
        );
        assert_eq!(
            runtime.event_profiling_info(event, CL_PROFILING_COMMAND_END).err(),
            Some(ClError::ProfilingInfoNotAvailable)
        );
    }

    #[test]
    fn test_failed_user_event_fails_the_wait() {
        let runtime = host_runtime();
        let context = runtime.create_context_from_type(CL_DEVICE_TYPE_ALL).unwrap();
        let ok = runtime.create_user_event(context).unwrap();
        let bad = runtime.create_user_event(context).unwrap();
        runtime.set_user_event_status(ok, CL_COMPLETE).unwrap();
        runtime.set_user_event_status(bad, -42).unwrap();
        assert_eq!(
            runtime.wait_for_events(&[ok, bad]).err(),
            Some(ClError::ExecStatusErrorForEventsInWaitList)
        );
        assert_eq!(runtime.wait_for_events(&[]).unwrap_err().code(), CL_INVALID_VALUE);
    }
}
