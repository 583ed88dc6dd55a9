//! Forking one stage and turning the child into the stage's program.

use std::ffi::{CStr, CString};
use std::os::fd::{AsRawFd, BorrowedFd};
use std::path::Path;

use nix::errno::Errno;
use nix::libc::{STDIN_FILENO, STDOUT_FILENO};
use nix::unistd::{ForkResult, dup2, execvp, fork};
use tracing::{error, info, warn};

use crate::channel::Channels;
use crate::env::Environment;
use crate::error::PipelineError;
use crate::path_lookup::find_command_path;
use crate::reaper::SignalMask;
use crate::stage::{InputSource, OutputSink, Stage};
use crate::supervisor::ChildProcess;

/// A program the child can try to load: the name given to `execvp` and its
/// full argument vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramImage {
    pub program: CString,
    pub argv: Vec<CString>,
}

impl ProgramImage {
    fn new(stage: &Stage, program: &str, args: &[String]) -> Result<Self, PipelineError> {
        let to_c = |s: &str| {
            CString::new(s).map_err(|_| PipelineError::NulByte {
                stage: stage.program.clone(),
            })
        };
        let program = to_c(program)?;
        let mut argv = Vec::with_capacity(args.len() + 1);
        argv.push(program.clone());
        for arg in args {
            argv.push(to_c(arg.as_str())?);
        }
        Ok(Self { program, argv })
    }

    pub fn program_name(&self) -> &str {
        self.program.to_str().unwrap_or("?")
    }
}

/// Ordered program images one child tries, first to last.
///
/// Everything is converted to C strings before the fork so the child does as
/// little as possible between `fork` and `exec`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecPlan {
    pub images: Vec<ProgramImage>,
}

impl ExecPlan {
    /// The stage's own program, plus the fallback pager (without arguments)
    /// when the stage is the final pager.
    pub fn for_stage(stage: &Stage, fallback_pager: &str) -> Result<Self, PipelineError> {
        let mut images = vec![ProgramImage::new(stage, &stage.program, &stage.args)?];
        if stage.is_final_pager() && stage.program != fallback_pager {
            images.push(ProgramImage::new(stage, fallback_pager, &[])?);
        }
        Ok(Self { images })
    }
}

/// Spawns stages wired to the shared channel set.
pub struct Launcher<'a> {
    env: &'a Environment,
    channels: &'a Channels,
    mask: &'a SignalMask,
}

impl<'a> Launcher<'a> {
    pub fn new(env: &'a Environment, channels: &'a Channels, mask: &'a SignalMask) -> Self {
        Self {
            env,
            channels,
            mask,
        }
    }

    /// Tell the user which pager is going to run.
    fn log_pager_selection(&self, stage: &Stage) {
        let search_path = std::ffi::OsStr::new(self.env.search_path());
        match find_command_path(search_path, Path::new(&stage.program)) {
            Some(path) => info!("pager: {} ({})", stage.program, path.display()),
            None => warn!(
                "pager {} not found on PATH, falling back to {}",
                stage.program,
                self.env.fallback_pager()
            ),
        }
    }

    /// Fork a child for the stage at `position` and exec its program.
    ///
    /// Returns the new child's identity in the parent. The child never returns
    /// from here: it either becomes the stage's program or exits with status 1.
    pub fn launch(&self, position: usize, stage: &Stage) -> Result<ChildProcess, PipelineError> {
        let plan = ExecPlan::for_stage(stage, self.env.fallback_pager())?;
        if stage.is_final_pager() {
            self.log_pager_selection(stage);
        }
        let (input, output) = stage_ends(self.channels, position, stage);

        // SAFETY: the supervising process is single-threaded, so the child
        // starts with every lock free.
        match unsafe { fork() } {
            Ok(ForkResult::Parent { child }) => {
                info!(pid = %child, "spawned {}", stage.argv().join(" "));
                Ok(ChildProcess::new(child, position, stage.program.as_str()))
            }
            Ok(ForkResult::Child) => self.become_stage(stage, &plan, input, output),
            Err(errno) => Err(PipelineError::Spawn {
                stage: stage.program.clone(),
                errno,
            }),
        }
    }

    /// Child side of [`launch`](Self::launch).
    fn become_stage(
        &self,
        stage: &Stage,
        plan: &ExecPlan,
        input: Option<BorrowedFd<'_>>,
        output: Option<BorrowedFd<'_>>,
    ) -> ! {
        self.mask.restore_in_child();

        if let Err(errno) = bind_stdio(input, output) {
            self.channels.close_all_in_child();
            error!(
                "{}",
                PipelineError::DescriptorBind {
                    stage: stage.program.clone(),
                    errno,
                }
            );
            exit_child(1);
        }
        self.channels.close_all_in_child();

        for image in &plan.images {
            let Err(errno) = exec(image);
            error!(
                "{}",
                PipelineError::Exec {
                    stage: stage.program.clone(),
                    program: image.program_name().to_string(),
                    errno,
                }
            );
        }
        exit_child(1)
    }
}

/// Channel ends a stage uses as stdin and stdout; `None` means inherit.
fn stage_ends<'c>(
    channels: &'c Channels,
    position: usize,
    stage: &Stage,
) -> (Option<BorrowedFd<'c>>, Option<BorrowedFd<'c>>) {
    let input = match stage.input {
        InputSource::InheritStdin => None,
        InputSource::PreviousStage => position
            .checked_sub(1)
            .and_then(|prev| channels.get(prev))
            .map(|c| c.read_end()),
    };
    let output = match stage.output {
        OutputSink::InheritStdout => None,
        OutputSink::NextStage => channels.get(position).map(|c| c.write_end()),
    };
    (input, output)
}

/// Install the stage's channel ends as its standard input and output.
fn bind_stdio(input: Option<BorrowedFd<'_>>, output: Option<BorrowedFd<'_>>) -> Result<(), Errno> {
    if let Some(fd) = input {
        dup2(fd.as_raw_fd(), STDIN_FILENO)?;
    }
    if let Some(fd) = output {
        dup2(fd.as_raw_fd(), STDOUT_FILENO)?;
    }
    Ok(())
}

/// Leave a forked child without running exit handlers or flushing buffers
/// inherited from the parent.
fn exit_child(code: i32) -> ! {
    // SAFETY: `_exit` only terminates the calling process.
    unsafe { nix::libc::_exit(code) }
}

/// Replace the process image. Only ever returns an error.
fn exec(image: &ProgramImage) -> Result<std::convert::Infallible, Errno> {
    let argv: Vec<&CStr> = image.argv.iter().map(CString::as_c_str).collect();
    execvp(&image.program, &argv)
}
