use crate::stage::{InputSource, OutputSink, Role, Stage};

/// Program that writes the environment.
pub const PRODUCER: &str = "printenv";
/// Program that receives the user's pattern and flags.
pub const FILTER: &str = "grep";
/// Program that orders the lines.
pub const SORTER: &str = "sort";

/// Ordered list of stages for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    stages: Vec<Stage>,
}

impl Topology {
    /// Decide the pipeline shape.
    ///
    /// Without filter arguments the pipeline is `printenv | sort | pager`. With
    /// any, `grep` is inserted after `printenv` and receives `filter_args`
    /// verbatim.
    pub fn plan(filter_args: &[String], pager: &str) -> Self {
        let mut roles = vec![(Role::Producer, PRODUCER, Vec::new())];
        if !filter_args.is_empty() {
            roles.push((Role::Filter, FILTER, filter_args.to_vec()));
        }
        roles.push((Role::Sorter, SORTER, Vec::new()));
        roles.push((Role::Pager, pager, Vec::new()));

        let last = roles.len() - 1;
        let stages = roles
            .into_iter()
            .enumerate()
            .map(|(position, (role, program, args))| Stage {
                role,
                program: program.to_string(),
                args,
                input: if position == 0 {
                    InputSource::InheritStdin
                } else {
                    InputSource::PreviousStage
                },
                output: if position == last {
                    OutputSink::InheritStdout
                } else {
                    OutputSink::NextStage
                },
            })
            .collect();
        Self { stages }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// One channel between every adjacent pair of stages.
    pub fn channel_count(&self) -> usize {
        self.stages.len().saturating_sub(1)
    }
}
