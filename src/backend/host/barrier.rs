//! Work-group barrier for the host interpreter

use std::sync::{Condvar, Mutex, PoisonError};

#[derive(Debug)]
struct State {
    /// Work-items that have not finished yet
    active: usize,
    waiting: usize,
    generation: u64,
}

/// Reusable barrier whose party count shrinks as work-items exit
///
/// A work-item that returns (or faults) before reaching a barrier leaves the
/// group instead of deadlocking the remaining items.
#[derive(Debug)]
pub(crate) struct GroupBarrier {
    state: Mutex<State>,
    cond: Condvar,
}

impl GroupBarrier {
    pub fn new(parties: usize) -> Self {
        Self {
            state: Mutex::new(State {
                active: parties,
                waiting: 0,
                generation: 0,
            }),
            cond: Condvar::new(),
        }
    }

    pub fn wait(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let generation = state.generation;
        state.waiting += 1;
        if state.waiting >= state.active {
            Self::release(&mut state);
            self.cond.notify_all();
            return;
        }
        while state.generation == generation {
            state = self
                .cond
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Remove one work-item from the group
    pub fn leave(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.active = state.active.saturating_sub(1);
        if state.waiting > 0 && state.waiting >= state.active {
            Self::release(&mut state);
            self.cond.notify_all();
        }
    }

    fn release(state: &mut State) {
        state.waiting = 0;
        state.generation = state.generation.wrapping_add(1);
    }
}

/// Leaves the barrier when dropped
pub(crate) struct Departure<'a>(pub &'a GroupBarrier);

impl Drop for Departure<'_> {
    fn drop(&mut self) {
        self.0.leave();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_all_parties_pass_each_phase_together() {
        let barrier = GroupBarrier::new(4);
        let counter = AtomicUsize::new(0);
        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    let _exit = Departure(&barrier);
                    counter.fetch_add(1, Ordering::SeqCst);
                    barrier.wait();
                    assert_eq!(counter.load(Ordering::SeqCst), 4);
                    barrier.wait();
                });
            }
        });
    }

    #[test]
    fn test_early_exit_does_not_deadlock() {
        let barrier = GroupBarrier::new(3);
        std::thread::scope(|s| {
            s.spawn(|| {
                let _exit = Departure(&barrier);
            });
            for _ in 0..2 {
                s.spawn(|| {
                    let _exit = Departure(&barrier);
                    barrier.wait();
                    barrier.wait();
                });
            }
        });
    }
}
