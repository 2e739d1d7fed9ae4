//! Process-control actions requested by the user.
//!
//! These run outside the sampler loop: the caller hands over an OS pid and
//! gets success or failure back. The sampler notices the effect (a dead or
//! suspended process) on its next tick.

use crate::types::{Result, TaskscopeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    Kill,
    Suspend,
    Resume,
}

impl ControlAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlAction::Kill => "kill",
            ControlAction::Suspend => "suspend",
            ControlAction::Resume => "resume",
        }
    }
}

pub fn kill(pid: u32) -> Result<()> {
    perform(ControlAction::Kill, pid)
}

pub fn suspend(pid: u32) -> Result<()> {
    perform(ControlAction::Suspend, pid)
}

pub fn resume(pid: u32) -> Result<()> {
    perform(ControlAction::Resume, pid)
}

#[cfg(unix)]
pub fn perform(action: ControlAction, pid: u32) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    if pid == 0 {
        return Err(TaskscopeError::PermissionDenied(
            "refusing to signal pid 0 (the whole process group)".to_string(),
        ));
    }
    let target = i32::try_from(pid)
        .map_err(|_| TaskscopeError::NotFound(format!("pid {pid} out of range")))?;

    let sig = match action {
        ControlAction::Kill => Signal::SIGKILL,
        ControlAction::Suspend => Signal::SIGSTOP,
        ControlAction::Resume => Signal::SIGCONT,
    };

    tracing::info!(pid, action = action.as_str(), "sending signal {sig:?}");
    signal::kill(Pid::from_raw(target), sig).map_err(|errno| match errno {
        Errno::ESRCH => TaskscopeError::NotFound(format!("Process {pid} not found")),
        Errno::EPERM => TaskscopeError::PermissionDenied(format!(
            "Cannot {} process {pid}",
            action.as_str()
        )),
        other => TaskscopeError::Transient(format!(
            "Failed to {} process {pid}: {other}",
            action.as_str()
        )),
    })
}

#[cfg(not(unix))]
pub fn perform(action: ControlAction, pid: u32) -> Result<()> {
    Err(TaskscopeError::Unsupported(format!(
        "{} of process {pid} is not implemented on this platform",
        action.as_str()
    )))
}
