/*!
A small thread-pool executor.

The pool keeps up to `core_size` resident workers, grows to `max_size`
when the submission queue is full, and shrinks back as workers sit idle
past the keep-alive timeout. Submissions return a [`Future`] that blocks
on [`Future::get`] until the task has run; a worker that aborts poisons
the future instead of unwinding across the pool.

The FSPT fitter uses one executor to fan the per-feature split search
out; the executor itself is task-agnostic and also runs periodic
background jobs.
*/

mod error;
mod future;
mod queue;
mod executor;

pub use error::{Error, Result};
pub use executor::{Executor, ExecutorBuilder};
pub use future::Future;
pub use queue::BoundedQueue;
