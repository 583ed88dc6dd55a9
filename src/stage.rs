use std::fmt;

/// The job a stage performs in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Writes the environment, one `NAME=value` per line.
    Producer,
    /// Keeps the lines the user asked for.
    Filter,
    /// Orders lines lexicographically.
    Sorter,
    /// Shows the result to the user. Always the last stage.
    Pager,
}

/// Where a stage reads its standard input from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputSource {
    /// Keep the standard input of the supervising process.
    InheritStdin,
    /// Read end of the channel written by the previous stage.
    PreviousStage,
}

/// Where a stage writes its standard output to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputSink {
    /// Write end of the channel read by the next stage.
    NextStage,
    /// Keep the standard output of the supervising process.
    InheritStdout,
}

/// One program position in the pipeline.
///
/// Stages are built once by [`Topology::plan`](crate::topology::Topology::plan)
/// and never change afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub role: Role,
    /// Program name, resolved through `PATH` when the stage is executed.
    pub program: String,
    /// Arguments passed after the program name.
    pub args: Vec<String>,
    pub input: InputSource,
    pub output: OutputSink,
}

impl Stage {
    /// Whether this is the terminal pager stage, the only one with an exec fallback.
    pub fn is_final_pager(&self) -> bool {
        self.role == Role::Pager
    }

    /// Full argument vector, including the program name as `argv[0]`.
    pub fn argv(&self) -> Vec<&str> {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect()
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)
    }
}
