//! The real [`ProcessControl`]: `waitpid` plus synchronously observed signals.
//!
//! Interrupts are never handled asynchronously. `SIGINT`, `SIGTERM` and
//! `SIGCHLD` are blocked before the first fork and picked up with `sigwait`
//! inside the supervisor's wait loop, so a kill broadcast only ever runs on the
//! main flow of control.

use nix::errno::Errno;
use nix::libc::c_int;
use nix::sys::signal::{
    self, SaFlags, SigAction, SigHandler, SigSet, SigmaskHow, Signal, sigaction,
};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use tracing::debug;

use crate::error::PipelineError;
use crate::supervisor::{Event, ProcessControl, Termination};

/// Signals that stop the pipeline when delivered to the supervising process.
pub const INTERRUPTS: [Signal; 2] = [Signal::SIGINT, Signal::SIGTERM];

extern "C" fn on_sigchld(_: c_int) {}

/// Signals blocked for the lifetime of the supervising process.
///
/// Created once before any child is forked. The mask stays in force in the
/// parent until it exits; children put the previous mask back with
/// [`restore_in_child`](Self::restore_in_child) before they exec.
#[derive(Debug)]
pub struct SignalMask {
    blocked: SigSet,
    previous: SigSet,
}

impl SignalMask {
    pub fn block() -> Result<Self, PipelineError> {
        let mut blocked = SigSet::empty();
        for sig in INTERRUPTS {
            blocked.add(sig);
        }
        blocked.add(Signal::SIGCHLD);

        // SIGCHLD is discarded at generation on some systems while its
        // disposition is the default; an empty handler keeps it pending.
        let action = SigAction::new(
            SigHandler::Handler(on_sigchld),
            SaFlags::SA_NOCLDSTOP | SaFlags::SA_RESTART,
            SigSet::empty(),
        );
        // SAFETY: the handler does nothing, so it is trivially async-signal-safe.
        unsafe { sigaction(Signal::SIGCHLD, &action) }.map_err(PipelineError::SignalSetup)?;

        let mut previous = SigSet::empty();
        signal::sigprocmask(SigmaskHow::SIG_BLOCK, Some(&blocked), Some(&mut previous))
            .map_err(PipelineError::SignalSetup)?;
        Ok(Self { blocked, previous })
    }

    /// Undo the parent's signal setup in a freshly forked child.
    ///
    /// Puts back the original mask and the default `SIGPIPE` disposition, which
    /// the Rust runtime sets to ignore and which would otherwise survive exec.
    pub fn restore_in_child(&self) {
        let _ = signal::sigprocmask(SigmaskHow::SIG_SETMASK, Some(&self.previous), None);
        // SAFETY: resetting to the default disposition installs no handler.
        let _ = unsafe { signal::signal(Signal::SIGPIPE, SigHandler::SigDfl) };
    }

    /// Block until one of the masked signals is pending and consume it.
    fn wait(&self) -> Result<Signal, Errno> {
        self.blocked.wait()
    }
}

/// Reaps children of the current process and watches for interrupts.
#[derive(Debug)]
pub struct SystemReaper<'a> {
    mask: &'a SignalMask,
}

impl<'a> SystemReaper<'a> {
    pub fn new(mask: &'a SignalMask) -> Self {
        Self { mask }
    }

    /// Reap one terminated child without blocking.
    fn try_reap(&self) -> Result<Option<(Pid, Termination)>, PipelineError> {
        loop {
            match waitpid(None::<Pid>, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::Exited(pid, code)) => {
                    return Ok(Some((pid, Termination::Exited(code))));
                }
                Ok(WaitStatus::Signaled(pid, signal, core_dumped)) => {
                    return Ok(Some((
                        pid,
                        Termination::Signaled {
                            signal,
                            core_dumped,
                        },
                    )));
                }
                Ok(WaitStatus::StillAlive) => return Ok(None),
                // Stop/continue notifications are not terminations.
                Ok(other) => debug!(?other, "ignoring wait status"),
                Err(Errno::EINTR) => {}
                Err(e) => return Err(PipelineError::Wait(e)),
            }
        }
    }
}

impl ProcessControl for SystemReaper<'_> {
    fn next_event(&mut self) -> Result<Event, PipelineError> {
        loop {
            if let Some((pid, termination)) = self.try_reap()? {
                return Ok(Event::Reaped { pid, termination });
            }
            match self.mask.wait() {
                Ok(Signal::SIGCHLD) => continue,
                Ok(sig) => return Ok(Event::Interrupted(sig)),
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(PipelineError::Wait(e)),
            }
        }
    }

    fn terminate(&mut self, pid: Pid) -> Result<(), Errno> {
        signal::kill(pid, Signal::SIGKILL)
    }
}
