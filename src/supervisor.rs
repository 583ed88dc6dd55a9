//! Reaping the cohort and tearing it down on failure.
//!
//! The [`Supervisor`] waits for *any* child to terminate, exactly as many times
//! as there are stages. It never waits for a particular child: a pager closed
//! early by the user exits before the stages feeding it, and waiting on an
//! upstream stage first would stall the loop.

use std::fmt;

use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use tracing::{error, info, warn};

use crate::error::PipelineError;

/// How a reaped child ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The child called `exit` with this status.
    Exited(i32),
    /// The child was terminated by a signal.
    Signaled { signal: Signal, core_dumped: bool },
}

impl Termination {
    /// Only `exit(0)` counts as a clean exit. A non-zero status and death by
    /// signal are both abnormal.
    pub fn is_clean(&self) -> bool {
        matches!(self, Termination::Exited(0))
    }

    /// Status a POSIX shell would report for this termination.
    pub fn shell_status(&self) -> i32 {
        match *self {
            Termination::Exited(code) => code,
            Termination::Signaled { signal, .. } => 128 + signal as i32,
        }
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::Exited(code) => write!(f, "exited with status {code}"),
            Termination::Signaled {
                signal,
                core_dumped,
            } => {
                write!(f, "was killed by {}", signal.as_str())?;
                if *core_dumped {
                    f.write_str(" (core dumped)")?;
                }
                Ok(())
            }
        }
    }
}

/// Lifecycle of one child, as far as the supervising process knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildState {
    /// Forked; the parent may still hold channel descriptors.
    Spawned,
    /// Every stage is launched and the parent has released its channel ends.
    Running,
    ExitedNormally,
    ExitedAbnormally(Termination),
    /// Sent `SIGKILL` by the supervisor and not reaped afterwards.
    Killed,
}

impl ChildState {
    pub fn is_alive(&self) -> bool {
        matches!(self, ChildState::Spawned | ChildState::Running)
    }
}

/// A spawned process standing for one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildProcess {
    pub pid: Pid,
    /// Position of the stage in the pipeline.
    pub position: usize,
    /// Program name of the stage, for diagnostics.
    pub stage: String,
    pub state: ChildState,
}

impl ChildProcess {
    pub fn new(pid: Pid, position: usize, stage: impl Into<String>) -> Self {
        Self {
            pid,
            position,
            stage: stage.into(),
            state: ChildState::Spawned,
        }
    }
}

/// Something the supervisor has to react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Reaped { pid: Pid, termination: Termination },
    Interrupted(Signal),
}

/// Operating-system side of supervision.
///
/// [`SystemReaper`](crate::reaper::SystemReaper) is the real implementation;
/// tests substitute a scripted one.
pub trait ProcessControl {
    /// Block until a child terminates or an interrupt arrives.
    fn next_event(&mut self) -> Result<Event, PipelineError>;

    /// Forcefully terminate `pid`.
    fn terminate(&mut self, pid: Pid) -> Result<(), Errno>;
}

/// Every child of the current run, in pipeline order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Cohort {
    children: Vec<ChildProcess>,
}

impl Cohort {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            children: Vec::with_capacity(capacity),
        }
    }

    pub fn register(&mut self, child: ChildProcess) {
        self.children.push(child);
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn children(&self) -> &[ChildProcess] {
        &self.children
    }

    pub fn get(&self, pid: Pid) -> Option<&ChildProcess> {
        self.children.iter().find(|c| c.pid == pid)
    }

    fn get_mut(&mut self, pid: Pid) -> Option<&mut ChildProcess> {
        self.children.iter_mut().find(|c| c.pid == pid)
    }

    /// Mark every freshly spawned child as running.
    pub fn mark_running(&mut self) {
        for child in &mut self.children {
            if child.state == ChildState::Spawned {
                child.state = ChildState::Running;
            }
        }
    }

    /// Number of children that have not been reaped or killed.
    pub fn alive(&self) -> usize {
        self.children.iter().filter(|c| c.state.is_alive()).count()
    }

    /// Send a forceful termination to every child still believed alive.
    ///
    /// Best effort: a failed `kill` is logged and the child is still marked
    /// [`ChildState::Killed`]. Returns how many children were targeted.
    pub fn kill_survivors(&mut self, control: &mut impl ProcessControl) -> usize {
        let mut targeted = 0;
        for child in self.children.iter_mut().filter(|c| c.state.is_alive()) {
            targeted += 1;
            match control.terminate(child.pid) {
                Ok(()) => info!(pid = %child.pid, "killed {}", child.stage),
                Err(e) => warn!(pid = %child.pid, "cannot kill {}: {}", child.stage, e),
            }
            child.state = ChildState::Killed;
        }
        targeted
    }
}

/// Drains termination events until the cohort is fully reaped or aborted.
#[derive(Debug, Default)]
pub struct Supervisor;

impl Supervisor {
    pub fn new() -> Self {
        Self
    }

    /// Reap every member of `cohort`.
    ///
    /// Returns `Ok(())` when all of them exited cleanly. The first abnormal
    /// termination, interrupt or wait failure kills the survivors and returns
    /// at once, without reaping them.
    pub fn supervise(
        &self,
        cohort: &mut Cohort,
        control: &mut impl ProcessControl,
    ) -> Result<(), PipelineError> {
        let expected = cohort.len();
        let mut reaped = 0;

        while reaped < expected {
            let (pid, termination) = match control.next_event() {
                Ok(Event::Reaped { pid, termination }) => (pid, termination),
                Ok(Event::Interrupted(signal)) => {
                    error!("received {}, stopping the pipeline", signal.as_str());
                    cohort.kill_survivors(control);
                    return Err(PipelineError::Interrupted(signal));
                }
                Err(err) => {
                    error!("{}", err);
                    cohort.kill_survivors(control);
                    return Err(err);
                }
            };

            let Some(child) = cohort.get_mut(pid) else {
                warn!(%pid, "reaped a process outside the pipeline: {}", termination);
                continue;
            };
            if !child.state.is_alive() {
                warn!(%pid, "{} was already reaped", child.stage);
                continue;
            }
            reaped += 1;

            if termination.is_clean() {
                child.state = ChildState::ExitedNormally;
                info!(%pid, "{} {}", child.stage, termination);
                continue;
            }

            child.state = ChildState::ExitedAbnormally(termination);
            let err = PipelineError::AbnormalTermination {
                stage: child.stage.clone(),
                pid,
                termination,
            };
            error!("{}", err);
            cohort.kill_survivors(control);
            return Err(err);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Replays a fixed list of events and records every kill.
    #[derive(Default)]
    struct Scripted {
        events: VecDeque<Event>,
        killed: Vec<Pid>,
        failing_kills: Vec<Pid>,
    }

    impl Scripted {
        fn new(events: impl IntoIterator<Item = Event>) -> Self {
            Self {
                events: events.into_iter().collect(),
                ..Self::default()
            }
        }
    }

    impl ProcessControl for Scripted {
        fn next_event(&mut self) -> Result<Event, PipelineError> {
            self.events
                .pop_front()
                .ok_or(PipelineError::Wait(Errno::ECHILD))
        }

        fn terminate(&mut self, pid: Pid) -> Result<(), Errno> {
            if self.failing_kills.contains(&pid) {
                return Err(Errno::ESRCH);
            }
            self.killed.push(pid);
            Ok(())
        }
    }

    fn pid(n: i32) -> Pid {
        Pid::from_raw(n)
    }

    fn cohort(names: &[&str]) -> Cohort {
        let mut cohort = Cohort::with_capacity(names.len());
        for (position, name) in names.iter().enumerate() {
            cohort.register(ChildProcess::new(pid(100 + position as i32), position, *name));
        }
        cohort.mark_running();
        cohort
    }

    fn exited(n: i32, code: i32) -> Event {
        Event::Reaped {
            pid: pid(n),
            termination: Termination::Exited(code),
        }
    }

    fn signaled(n: i32, signal: Signal) -> Event {
        Event::Reaped {
            pid: pid(n),
            termination: Termination::Signaled {
                signal,
                core_dumped: false,
            },
        }
    }

    fn states(cohort: &Cohort) -> Vec<ChildState> {
        cohort.children().iter().map(|c| c.state).collect()
    }

    #[test]
    fn test_all_clean_in_any_order() {
        let mut cohort = cohort(&["printenv", "sort", "less"]);
        // The pager finishes first; the supervisor must not care.
        let mut control = Scripted::new([exited(102, 0), exited(100, 0), exited(101, 0)]);

        Supervisor::new()
            .supervise(&mut cohort, &mut control)
            .expect("clean run");

        assert_eq!(states(&cohort), vec![ChildState::ExitedNormally; 3]);
        assert!(control.killed.is_empty());
        assert!(control.events.is_empty(), "every reap consumed exactly once");
    }

    #[test]
    fn test_waits_exactly_once_per_stage() {
        let mut cohort = cohort(&["printenv", "grep", "sort", "less"]);
        let mut control = Scripted::new([
            exited(100, 0),
            exited(101, 0),
            exited(102, 0),
            exited(103, 0),
            // Not part of this run; must stay unread.
            exited(999, 0),
        ]);

        Supervisor::new()
            .supervise(&mut cohort, &mut control)
            .expect("clean run");
        assert_eq!(control.events.len(), 1);
    }

    #[test]
    fn test_duplicate_and_foreign_reaps_are_not_counted() {
        let mut cohort = cohort(&["printenv", "sort", "less"]);
        let mut control = Scripted::new([
            exited(100, 0),
            exited(100, 0),
            exited(4242, 3),
            exited(101, 0),
            exited(102, 0),
        ]);

        Supervisor::new()
            .supervise(&mut cohort, &mut control)
            .expect("foreign failures do not abort the run");
        assert_eq!(states(&cohort), vec![ChildState::ExitedNormally; 3]);
        assert!(control.events.is_empty());
    }

    #[test]
    fn test_signal_death_kills_survivors() {
        let mut cohort = cohort(&["printenv", "grep", "sort", "less"]);
        let mut control = Scripted::new([exited(100, 0), signaled(102, Signal::SIGSEGV)]);

        let err = Supervisor::new()
            .supervise(&mut cohort, &mut control)
            .expect_err("abnormal termination");

        match err {
            PipelineError::AbnormalTermination {
                stage,
                pid: failed,
                termination,
            } => {
                assert_eq!(stage, "sort");
                assert_eq!(failed, pid(102));
                assert!(!termination.is_clean());
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(control.killed, vec![pid(101), pid(103)]);
        assert_eq!(
            states(&cohort),
            vec![
                ChildState::ExitedNormally,
                ChildState::Killed,
                ChildState::ExitedAbnormally(Termination::Signaled {
                    signal: Signal::SIGSEGV,
                    core_dumped: false,
                }),
                ChildState::Killed,
            ]
        );
        assert_eq!(cohort.alive(), 0);
    }

    #[test]
    fn test_nonzero_exit_is_abnormal() {
        let mut cohort = cohort(&["printenv", "grep", "sort", "less"]);
        let mut control = Scripted::new([exited(101, 1)]);

        let err = Supervisor::new()
            .supervise(&mut cohort, &mut control)
            .expect_err("grep exit 1 aborts");
        assert!(matches!(err, PipelineError::AbnormalTermination { .. }));
        assert_eq!(control.killed, vec![pid(100), pid(102), pid(103)]);
    }

    #[test]
    fn test_interrupt_kills_everyone_still_alive() {
        let mut cohort = cohort(&["printenv", "sort", "less"]);
        let mut control = Scripted::new([
            exited(100, 0),
            Event::Interrupted(Signal::SIGINT),
            exited(101, 0),
        ]);

        let err = Supervisor::new()
            .supervise(&mut cohort, &mut control)
            .expect_err("interrupted");
        assert!(matches!(err, PipelineError::Interrupted(Signal::SIGINT)));
        assert_eq!(control.killed, vec![pid(101), pid(102)]);
        assert_eq!(control.events.len(), 1, "no reaping after the interrupt");
    }

    #[test]
    fn test_failed_kill_is_not_fatal() {
        let mut cohort = cohort(&["printenv", "sort", "less"]);
        let mut control = Scripted::new([signaled(100, Signal::SIGPIPE)]);
        control.failing_kills.push(pid(101));

        let err = Supervisor::new()
            .supervise(&mut cohort, &mut control)
            .expect_err("abnormal termination");
        assert!(matches!(err, PipelineError::AbnormalTermination { .. }));
        assert_eq!(control.killed, vec![pid(102)]);
        assert_eq!(cohort.get(pid(101)).map(|c| c.state), Some(ChildState::Killed));
    }

    #[test]
    fn test_kill_survivors_skips_finished_children() {
        let mut cohort = cohort(&["printenv", "sort", "less"]);
        cohort.children[0].state = ChildState::ExitedNormally;
        let mut control = Scripted::default();

        assert_eq!(cohort.kill_survivors(&mut control), 2);
        // A second broadcast has nobody left to target.
        assert_eq!(cohort.kill_survivors(&mut control), 0);
        assert_eq!(control.killed, vec![pid(101), pid(102)]);
    }

    #[test]
    fn test_wait_error_propagates() {
        let mut cohort = cohort(&["printenv", "sort", "less"]);
        let mut control = Scripted::new([exited(100, 0)]);

        let err = Supervisor::new()
            .supervise(&mut cohort, &mut control)
            .expect_err("events run out");
        assert!(matches!(err, PipelineError::Wait(Errno::ECHILD)));
        assert_eq!(control.killed, vec![pid(101), pid(102)]);
        assert_eq!(cohort.alive(), 0);
    }

    #[test]
    fn test_wait_error_before_any_reap_kills_everyone() {
        struct Broken {
            killed: Vec<Pid>,
        }

        impl ProcessControl for Broken {
            fn next_event(&mut self) -> Result<Event, PipelineError> {
                Err(PipelineError::Wait(Errno::EINVAL))
            }

            fn terminate(&mut self, pid: Pid) -> Result<(), Errno> {
                self.killed.push(pid);
                Ok(())
            }
        }

        let mut cohort = cohort(&["printenv", "sort", "less"]);
        let mut control = Broken { killed: Vec::new() };

        let err = Supervisor::new()
            .supervise(&mut cohort, &mut control)
            .expect_err("wait fails");
        assert!(matches!(err, PipelineError::Wait(Errno::EINVAL)));
        assert_eq!(control.killed, vec![pid(100), pid(101), pid(102)]);
        assert_eq!(cohort.alive(), 0);
    }

    #[test]
    fn test_termination_display_and_status() {
        let crashed = Termination::Signaled {
            signal: Signal::SIGSEGV,
            core_dumped: true,
        };
        assert_eq!(crashed.to_string(), "was killed by SIGSEGV (core dumped)");
        assert_eq!(crashed.shell_status(), 139);
        assert_eq!(Termination::Exited(2).to_string(), "exited with status 2");
        assert_eq!(Termination::Exited(2).shell_status(), 2);
        assert!(Termination::Exited(0).is_clean());
    }
}
