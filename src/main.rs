use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};

use flatman::command::{CommandRunner, CompletionResult, RunHandle, RunnerEvent};
use flatman::flatpak::FlatpakOp;

/// Grace period for stopping a command on Ctrl-C
const STOP_GRACE: Duration = Duration::from_secs(2);

/// Conventional exit code for termination by SIGINT
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser, Debug)]
#[command(
    name = "flatman",
    version,
    about = "Manage Flatpak applications from the command line",
    long_about = None
)]
struct Args {
    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// List installed applications
    List,
    /// Check for available updates
    Updates,
    /// Install an application by ID (e.g. org.gimp.GIMP)
    Install { app_id: String },
    /// Uninstall an application by ID
    Uninstall { app_id: String },
    /// Remove unused runtimes and extensions
    Clean,
    /// Repair the local Flatpak installation
    Repair,
    /// List configured remotes
    Remotes,
    /// Add a remote repository
    RemoteAdd { name: String, url: String },
    /// Delete a remote repository
    RemoteDelete { name: String },
    /// Export the list of installed applications to a file
    Export { path: PathBuf },
    /// Show the flatpak version
    Version,
}

impl Action {
    /// Flatpak operations this action runs, in order
    fn ops(self) -> Vec<FlatpakOp> {
        match self {
            Self::List => vec![FlatpakOp::ListApps],
            // Refresh repository metadata first so the update listing is
            // current, matching `flatpak update --appstream` semantics.
            Self::Updates => vec![FlatpakOp::RefreshAppstream, FlatpakOp::ListUpdates],
            Self::Install { app_id } => vec![FlatpakOp::Install { app_id }],
            Self::Uninstall { app_id } => vec![FlatpakOp::Uninstall { app_id }],
            Self::Clean => vec![FlatpakOp::RemoveUnused],
            Self::Repair => vec![FlatpakOp::Repair],
            Self::Remotes => vec![FlatpakOp::Remotes],
            Self::RemoteAdd { name, url } => vec![FlatpakOp::RemoteAdd { name, url }],
            Self::RemoteDelete { name } => vec![FlatpakOp::RemoteDelete { name }],
            Self::Version => vec![FlatpakOp::Version],
            Self::Export { .. } => Vec::new(),
        }
    }
}

/// How a single run ended from the CLI's point of view
enum RunOutcome {
    Completed(CompletionResult),
    Cancelled,
}

/// Drain a run's events, forwarding each line to `on_line`
///
/// Ctrl-C stops the active run and reports it as cancelled; a cancelled run
/// closes its channel without a completion event.
async fn stream_run(handle: &mut RunHandle, mut on_line: impl FnMut(&str)) -> RunOutcome {
    loop {
        tokio::select! {
            event = handle.next_event() => match event {
                Some(RunnerEvent::Line(line)) => on_line(&line),
                Some(RunnerEvent::Completed(result)) => return RunOutcome::Completed(result),
                None => return RunOutcome::Cancelled,
            },
            _ = tokio::signal::ctrl_c() => {
                log::info!("interrupted, stopping active command");
                handle.stop(STOP_GRACE).await;
                return RunOutcome::Cancelled;
            }
        }
    }
}

fn report_failure(result: &CompletionResult) {
    if result.error_detail.is_empty() {
        // The command's own stderr was already streamed to the terminal.
        log::error!("command exited with a non-zero status");
    } else {
        log::error!("command failed: {}", result.error_detail);
    }
}

/// Run a sequence of operations, stopping at the first failure
async fn run_ops(runner: &mut CommandRunner, ops: Vec<FlatpakOp>) -> ExitCode {
    for op in ops {
        println!("{}", op.describe());
        let mut handle = runner.start(op.command()).await;
        match stream_run(&mut handle, |line| println!("{line}")).await {
            RunOutcome::Cancelled => return ExitCode::from(EXIT_INTERRUPTED),
            RunOutcome::Completed(result) if result.success => {}
            RunOutcome::Completed(result) => {
                report_failure(&result);
                return ExitCode::FAILURE;
            }
        }
    }
    ExitCode::SUCCESS
}

/// Run the list operation and write its output to `path`
///
/// The runner never retains output; the subscriber collects the lines here.
async fn export_list(runner: &mut CommandRunner, path: &Path) -> ExitCode {
    let op = FlatpakOp::ExportList;
    println!("{}", op.describe());

    let mut handle = runner.start(op.command()).await;
    let mut lines = Vec::new();
    match stream_run(&mut handle, |line| lines.push(line.to_string())).await {
        RunOutcome::Cancelled => ExitCode::from(EXIT_INTERRUPTED),
        RunOutcome::Completed(result) if result.success => {
            let mut contents = String::from(
                "Installed Flatpak applications\n==============================\n\n",
            );
            for line in &lines {
                contents.push_str(line);
                contents.push('\n');
            }
            match tokio::fs::write(path, contents).await {
                Ok(()) => {
                    println!("Exported {} entries to {}", lines.len(), path.display());
                    ExitCode::SUCCESS
                }
                Err(error) => {
                    log::error!("could not write {}: {error}", path.display());
                    ExitCode::FAILURE
                }
            }
        }
        RunOutcome::Completed(result) => {
            report_failure(&result);
            ExitCode::FAILURE
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let mut runner = CommandRunner::new();
    match args.action {
        Action::Export { path } => export_list(&mut runner, &path).await,
        action => run_ops(&mut runner, action.ops()).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_parse_install_subcommand() {
        let args = Args::try_parse_from(["flatman", "install", "org.gimp.GIMP"]).unwrap();
        let Action::Install { app_id } = args.action else {
            panic!("expected install action");
        };
        assert_eq!(app_id, "org.gimp.GIMP");
    }

    #[test]
    fn action_updates_refreshes_appstream_before_listing() {
        let ops = Action::Updates.ops();
        assert_eq!(ops, vec![FlatpakOp::RefreshAppstream, FlatpakOp::ListUpdates]);
    }

    #[test]
    fn action_clean_removes_unused() {
        assert_eq!(Action::Clean.ops(), vec![FlatpakOp::RemoveUnused]);
    }
}
