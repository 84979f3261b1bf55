//! Shell resolution (§4.5).
//!
//! Default shell is platform-appropriate; a user-specified shell is honored
//! if discoverable on the path. Known shells map to specific argv prefixes.

use thiserror::Error;

#[derive(Debug, Error, Clone)]
#[error("shell `{0}` is not discoverable on the path")]
pub struct ShellNotFound(pub String);

/// A resolved shell: the executable to spawn plus the argv prefix that
/// precedes the command text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedShell {
    pub program: String,
    pub prefix_args: Vec<String>,
}

impl ResolvedShell {
    /// Build the full argv for running `command` through this shell.
    pub fn argv(&self, command: &str) -> (String, Vec<String>) {
        let mut args = self.prefix_args.clone();
        args.push(command.to_string());
        (self.program.clone(), args)
    }
}

fn prefix_for(name: &str) -> Vec<String> {
    match name {
        "sh" | "bash" | "zsh" | "fish" => vec!["-euc".to_string()],
        "pwsh" | "powershell" => vec!["-NoProfile".to_string(), "-Command".to_string()],
        "cmd" | "cmd.exe" => vec!["/C".to_string()],
        _ => vec!["-c".to_string()],
    }
}

/// Resolve the shell to use for a command, honoring an explicit selector
/// when present and falling back to the platform default otherwise.
pub fn resolve(explicit: Option<&str>) -> Result<ResolvedShell, ShellNotFound> {
    match explicit {
        Some(name) => resolve_named(name),
        None => Ok(default_for_platform()),
    }
}

fn resolve_named(name: &str) -> Result<ResolvedShell, ShellNotFound> {
    let program = name.to_string();
    which::which(&program).map_err(|_| ShellNotFound(program.clone()))?;
    Ok(ResolvedShell { program, prefix_args: prefix_for(name) })
}

#[cfg(unix)]
fn default_for_platform() -> ResolvedShell {
    ResolvedShell { program: "sh".to_string(), prefix_args: prefix_for("sh") }
}

#[cfg(windows)]
fn default_for_platform() -> ResolvedShell {
    if which::which("bash").is_ok() {
        ResolvedShell { program: "bash".to_string(), prefix_args: prefix_for("bash") }
    } else {
        ResolvedShell { program: "cmd.exe".to_string(), prefix_args: prefix_for("cmd.exe") }
    }
}
