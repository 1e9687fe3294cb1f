use crate::command::Command;

/// Column set used for application listings
const APP_COLUMNS: &str = "--columns=application,version,branch,origin";

/// A Flatpak operation and the arguments it needs
///
/// Each variant maps to one invocation of the `flatpak` binary. Output is
/// passed through as raw lines; nothing here parses it into records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlatpakOp {
    /// List installed applications
    ListApps,
    /// List installed applications in the compact form used for file export
    ExportList,
    /// List available updates from configured remotes
    ListUpdates,
    /// Refresh appstream metadata before checking updates
    RefreshAppstream,
    /// Install an application by ID
    Install { app_id: String },
    /// Uninstall an application by ID
    Uninstall { app_id: String },
    /// Remove unused runtimes and extensions
    RemoveUnused,
    /// Repair the local installation
    Repair,
    /// List configured remotes
    Remotes,
    /// Add a remote, skipping it if one with the same name exists
    RemoteAdd { name: String, url: String },
    /// Delete a remote by name
    RemoteDelete { name: String },
    /// Query the flatpak version
    Version,
}

impl FlatpakOp {
    /// Build the `flatpak` invocation for this operation
    pub fn command(&self) -> Command {
        let args: Vec<&str> = match self {
            Self::ListApps => vec!["list", "--app", APP_COLUMNS],
            Self::ExportList => vec!["list", "--app", "--columns=application,version"],
            Self::ListUpdates => vec!["remote-ls", "--updates", APP_COLUMNS],
            Self::RefreshAppstream => vec!["update", "--appstream"],
            Self::Install { app_id } => vec!["install", "-y", app_id],
            Self::Uninstall { app_id } => vec!["uninstall", "-y", app_id],
            Self::RemoveUnused => vec!["uninstall", "--unused", "-y"],
            Self::Repair => vec!["repair"],
            Self::Remotes => vec!["remotes", "--columns=name,url,options"],
            Self::RemoteAdd { name, url } => vec!["remote-add", "--if-not-exists", name, url],
            Self::RemoteDelete { name } => vec!["remote-delete", name],
            Self::Version => vec!["--version"],
        };
        Command::new("flatpak", args)
    }

    /// Human-readable progress message shown before the command runs
    pub fn describe(&self) -> String {
        match self {
            Self::ListApps => "Listing installed applications...".into(),
            Self::ExportList => "Collecting installed applications...".into(),
            Self::ListUpdates => "Checking for available updates...".into(),
            Self::RefreshAppstream => "Refreshing appstream metadata...".into(),
            Self::Install { app_id } => format!("Installing {app_id}..."),
            Self::Uninstall { app_id } => format!("Uninstalling {app_id}..."),
            Self::RemoveUnused => "Removing unused runtimes...".into(),
            Self::Repair => "Repairing the Flatpak installation...".into(),
            Self::Remotes => "Listing configured remotes...".into(),
            Self::RemoteAdd { name, .. } => format!("Adding remote {name}..."),
            Self::RemoteDelete { name } => format!("Deleting remote {name}..."),
            Self::Version => "Querying flatpak version...".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(FlatpakOp::ListApps, &["list", "--app", "--columns=application,version,branch,origin"])]
    #[case(FlatpakOp::ExportList, &["list", "--app", "--columns=application,version"])]
    #[case(FlatpakOp::ListUpdates, &["remote-ls", "--updates", "--columns=application,version,branch,origin"])]
    #[case(FlatpakOp::RefreshAppstream, &["update", "--appstream"])]
    #[case(FlatpakOp::RemoveUnused, &["uninstall", "--unused", "-y"])]
    #[case(FlatpakOp::Repair, &["repair"])]
    #[case(FlatpakOp::Remotes, &["remotes", "--columns=name,url,options"])]
    #[case(FlatpakOp::Version, &["--version"])]
    fn flatpak_op_maps_to_expected_arguments(#[case] op: FlatpakOp, #[case] expected: &[&str]) {
        let command = op.command();
        assert_eq!(command.program(), "flatpak");
        assert_eq!(command.args(), expected);
    }

    #[test]
    fn flatpak_op_install_includes_app_id() {
        let command = FlatpakOp::Install {
            app_id: "org.gimp.GIMP".into(),
        }
        .command();
        assert_eq!(command.args(), ["install", "-y", "org.gimp.GIMP"]);
    }

    #[test]
    fn flatpak_op_uninstall_includes_app_id() {
        let command = FlatpakOp::Uninstall {
            app_id: "org.gimp.GIMP".into(),
        }
        .command();
        assert_eq!(command.args(), ["uninstall", "-y", "org.gimp.GIMP"]);
    }

    #[test]
    fn flatpak_op_remote_add_includes_name_and_url() {
        let command = FlatpakOp::RemoteAdd {
            name: "flathub".into(),
            url: "https://dl.flathub.org/repo/flathub.flatpakrepo".into(),
        }
        .command();
        assert_eq!(
            command.args(),
            [
                "remote-add",
                "--if-not-exists",
                "flathub",
                "https://dl.flathub.org/repo/flathub.flatpakrepo"
            ]
        );
    }

    #[test]
    fn flatpak_op_remote_delete_includes_name() {
        let command = FlatpakOp::RemoteDelete {
            name: "flathub".into(),
        }
        .command();
        assert_eq!(command.args(), ["remote-delete", "flathub"]);
    }

    #[test]
    fn flatpak_op_describe_mentions_app_id() {
        let op = FlatpakOp::Install {
            app_id: "org.gimp.GIMP".into(),
        };
        assert!(op.describe().contains("org.gimp.GIMP"));
    }
}
