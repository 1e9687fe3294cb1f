mod runner;

pub use runner::{Command, CommandRunner, CompletionResult, RunHandle, RunnerEvent};
