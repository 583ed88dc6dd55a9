use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use thiserror::Error;

use crate::supervisor::Termination;

/// Everything that can go wrong while building or supervising a pipeline.
///
/// Faults inside a child ([`DescriptorBind`](Self::DescriptorBind),
/// [`Exec`](Self::Exec)) are reported by that child, which then exits with
/// status 1. The supervisor sees that exit as an
/// [`AbnormalTermination`](Self::AbnormalTermination).
///
/// OS error codes are part of the message, not a separate source, so a
/// report printed with `{:#}` names each cause once.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("cannot allocate channel {index}: {errno}")]
    ResourceExhausted { index: usize, errno: Errno },

    #[error("{stage}: cannot bind standard input/output: {errno}")]
    DescriptorBind { stage: String, errno: Errno },

    #[error("{stage}: cannot execute {program}: {errno}")]
    Exec {
        stage: String,
        program: String,
        errno: Errno,
    },

    #[error("{stage}: argument contains a NUL byte")]
    NulByte { stage: String },

    #[error("{stage}: cannot spawn: {errno}")]
    Spawn { stage: String, errno: Errno },

    #[error("{stage} (pid {pid}) {termination}")]
    AbnormalTermination {
        stage: String,
        pid: Pid,
        termination: Termination,
    },

    #[error("interrupted by {}", .0.as_str())]
    Interrupted(Signal),

    #[error("cannot set up signal handling: {0}")]
    SignalSetup(Errno),

    #[error("cannot wait for children: {0}")]
    Wait(Errno),
}
