//! Error type for kernel object construction.
//!
//! Queue operations report failure as `bool`/`Result<(), T>` and teardown has
//! no failure path, so the only fallible operation is asking the runtime for
//! a new execution context.

use thiserror::Error;

use crate::config::TaskName;

/// Errors produced when creating kernel objects.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The runtime could not create the execution context (out of memory,
    /// task table full, or the host could not spawn a thread).
    #[error("runtime refused to create task `{name}`")]
    TaskCreate {
        /// Name of the task that could not be created.
        name: TaskName,
    },
}
