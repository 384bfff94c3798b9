//! Generic command runner for the optional helpers (kioclient, desktop database refresh).

use crate::HalResult;
use std::process::Output;
use std::time::Duration;

pub trait ProcessOps {
    /// Run `program` and capture its output. A non-zero exit is not an error here.
    fn command_output(&self, program: &str, args: &[&str], timeout: Duration) -> HalResult<Output>;

    /// Run `program`; a non-zero exit maps to `HalError::CommandFailed`.
    fn command_status(&self, program: &str, args: &[&str], timeout: Duration) -> HalResult<()>;
}
