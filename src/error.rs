use thiserror::Error;

/// Failures the runner itself can hit while managing a child process.
///
/// These never surface as `Err` values to callers. The runner converts them
/// into a failed [`CompletionResult`](crate::command::CompletionResult) so
/// subscribers observe every outcome through the same event channel.
#[derive(Debug, Error)]
pub enum RunError {
    /// The submitted command had no program to execute
    #[error("empty command")]
    EmptyCommand,
    /// The output pipe could not be created
    #[error("failed to create output pipe: {0}")]
    Pipe(#[source] std::io::Error),
    /// The child process could not be launched
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    /// Reading the child's output failed mid-stream
    #[error("failed to read command output: {0}")]
    Stream(#[from] std::io::Error),
}
