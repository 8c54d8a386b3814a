//! Futures with wait-for-result semantics.

use std::sync::{Arc, Condvar, Mutex};

use crate::error::{Error, Result};

/// Handle to the eventual result of a submitted task.
///
/// [`Future::get`] consumes the handle: the result is read exactly once
/// and the shared state dropped with it.
pub struct Future<T> {
    state: Arc<State<T>>,
}

pub(crate) struct State<T> {
    slot: Mutex<Slot<T>>,
    done: Condvar,
}

enum Slot<T> {
    Pending,
    Ready(T),
    Poisoned,
}

impl<T> Future<T> {
    pub(crate) fn pending() -> (Self, Arc<State<T>>) {
        let state = Arc::new(State {
            slot: Mutex::new(Slot::Pending),
            done: Condvar::new(),
        });
        (
            Self {
                state: Arc::clone(&state),
            },
            state,
        )
    }

    /// Blocks until the task completes and returns its result.
    ///
    /// A task that aborted (panicked inside a worker) surfaces as
    /// [`Error::TaskAborted`]; the panic never crosses the pool
    /// boundary.
    pub fn get(self) -> Result<T> {
        let mut slot = self.state.slot.lock().expect("future poisoned");
        loop {
            match std::mem::replace(&mut *slot, Slot::Pending) {
                Slot::Ready(value) => return Ok(value),
                Slot::Poisoned => return Err(Error::TaskAborted),
                Slot::Pending => {
                    slot = self.state.done.wait(slot).expect("future poisoned");
                }
            }
        }
    }

    /// Non-blocking check, mostly for tests and diagnostics.
    pub fn is_done(&self) -> bool {
        !matches!(
            *self.state.slot.lock().expect("future poisoned"),
            Slot::Pending
        )
    }
}

impl<T> State<T> {
    pub(crate) fn complete(&self, value: T) {
        *self.slot.lock().expect("future poisoned") = Slot::Ready(value);
        self.done.notify_all();
    }

    pub(crate) fn poison(&self) {
        *self.slot.lock().expect("future poisoned") = Slot::Poisoned;
        self.done.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn get_blocks_until_complete() {
        let (future, state) = Future::pending();
        assert!(!future.is_done());
        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            state.complete(41);
        });
        assert_eq!(future.get(), Ok(41));
        producer.join().unwrap();
    }

    #[test]
    fn poisoned_future_reports_abort() {
        let (future, state) = Future::<i32>::pending();
        state.poison();
        assert_eq!(future.get(), Err(Error::TaskAborted));
    }
}
