use tracing::debug;

use crate::channel::Channels;
use crate::env::Environment;
use crate::error::PipelineError;
use crate::launcher::Launcher;
use crate::reaper::{SignalMask, SystemReaper};
use crate::supervisor::{Cohort, Supervisor};
use crate::topology::Topology;

/// One run of `printenv | [grep ARGS |] sort | $PAGER`.
///
/// The pipeline owns everything the run needs: the planned stages and the
/// configuration they were planned from. Channels, the signal mask and the
/// cohort are created by [`run`](Self::run) and live only as long as it does.
///
/// Example
/// ```no_run
/// use digenv::Pipeline;
/// use digenv::env::Environment;
///
/// let pipeline = Pipeline::new(&["PATH".to_string()], Environment::new());
/// assert_eq!(pipeline.topology().len(), 4);
/// pipeline.run().expect("every stage exited cleanly");
/// ```
#[derive(Debug)]
pub struct Pipeline {
    topology: Topology,
    env: Environment,
}

impl Pipeline {
    /// Plan a pipeline for the given filter arguments.
    pub fn new(filter_args: &[String], env: Environment) -> Self {
        let topology = Topology::plan(filter_args, env.pager());
        Self { topology, env }
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Build the pipeline, run it, and wait for it to finish.
    ///
    /// Returns `Ok(())` only if every stage exited with status 0. Must be
    /// called from a single-threaded process, since it forks and waits for any
    /// child.
    pub fn run(self) -> Result<(), PipelineError> {
        let mask = SignalMask::block()?;
        let channels = Channels::allocate(self.topology.channel_count())?;
        let mut reaper = SystemReaper::new(&mask);
        let mut cohort = Cohort::with_capacity(self.topology.len());

        let launcher = Launcher::new(&self.env, &channels, &mask);
        for (position, stage) in self.topology.stages().iter().enumerate() {
            match launcher.launch(position, stage) {
                Ok(child) => cohort.register(child),
                Err(err) => {
                    cohort.kill_survivors(&mut reaper);
                    return Err(err);
                }
            }
        }

        // Only the children may hold channel ends from here on, otherwise the
        // readers never see end-of-stream.
        drop(launcher);
        drop(channels);
        cohort.mark_running();
        debug!(stages = cohort.len(), "pipeline running");

        Supervisor::new().supervise(&mut cohort, &mut reaper)
    }
}
