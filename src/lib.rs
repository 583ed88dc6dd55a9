//! Show the process environment, optionally filtered, through a pager.
//!
//! The crate assembles a fixed pipeline of external programs
//! (`printenv | [grep ARGS |] sort | $PAGER`), connects the stages with pipes,
//! and supervises the children until every one of them has exited. The first
//! abnormal exit, or an interrupt delivered to the supervising process, kills the
//! rest of the pipeline.
//!
//! The pieces are kept separate so they can be tested on their own:
//! [`topology`] decides which stages run, [`channel`] allocates the pipes,
//! [`launcher`] forks and execs one stage, and [`supervisor`] reaps the cohort.
//! [`Pipeline`] ties them together.

pub mod channel;
pub mod env;
pub mod error;
pub mod launcher;
mod path_lookup;
mod pipeline;
pub mod reaper;
pub mod stage;
pub mod supervisor;
pub mod topology;

pub use error::PipelineError;
/// The orchestrator that runs one pipeline from planning to the last reap.
///
/// See [`Pipeline`] for the high-level API.
pub use pipeline::Pipeline;
