//! Durable job model and the store-backed queue.

mod job;
mod queue;

pub use job::{EnqueueOptions, Job, JobStatus, RetrySettings};
pub use queue::JobQueue;

/// Job kind executed by the `exec` driver family.
pub const FN_EXECUTE_EXEC: &str = "execute_commands_exec";
/// Job kind executed by the `shell` driver family.
pub const FN_EXECUTE_SHELL: &str = "execute_commands_shell";
/// Job kind that enumerates credential ids through the worker's plugin.
pub const FN_LIST_CREDENTIALS: &str = "list_credentials";

/// Map a driver family to its execute-commands job kind.
pub fn execute_function(driver_family: &str) -> String {
    format!("execute_commands_{driver_family}")
}

/// The driver family embedded in an execute-commands job kind, if any.
pub fn driver_family_of(function: &str) -> Option<&str> {
    function.strip_prefix("execute_commands_")
}
