//! Host-side project loading: the callback the watcher hands parsed control files to.
use crate::config::LoaderConfig;
use std::process::{Command, ExitStatus, Stdio};

/// Error returned by a host load routine. Logged by the dispatcher, never propagated.
pub type LoadError = Box<dyn std::error::Error + Send + Sync>;

/// The host application's project-loading routine.
///
/// Called once per accepted control file, on a blocking worker owned by the
/// dispatcher. Implementations may block for as long as the load takes; no new
/// control file is accepted until this returns.
pub trait ProjectLoader: Send + Sync + 'static {
    fn load_project(&self, folder: &str, maidata: &str, track: &str) -> Result<(), LoadError>;
}

impl<F> ProjectLoader for F
where
    F: Fn(&str, &str, &str) -> Result<(), LoadError> + Send + Sync + 'static,
{
    fn load_project(&self, folder: &str, maidata: &str, track: &str) -> Result<(), LoadError> {
        self(folder, maidata, track)
    }
}

/// Loader that only records the request in the log.
#[derive(Debug, Default)]
pub struct LogLoader;

impl ProjectLoader for LogLoader {
    fn load_project(&self, folder: &str, maidata: &str, track: &str) -> Result<(), LoadError> {
        tracing::info!(folder, maidata, track, "project load requested");
        Ok(())
    }
}

/// Errors from running the external load command.
#[derive(Debug)]
pub enum CommandError {
    /// Failed to spawn the command.
    Spawn {
        command: String,
        source: std::io::Error,
    },
    /// The command ran but exited unsuccessfully.
    Failed { command: String, status: ExitStatus },
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::Spawn { command, source } => {
                write!(f, "failed to spawn load command {}: {}", command, source)
            }
            CommandError::Failed { command, status } => {
                write!(f, "load command {} exited with {}", command, status)
            }
        }
    }
}

impl std::error::Error for CommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CommandError::Spawn { source, .. } => Some(source),
            CommandError::Failed { .. } => None,
        }
    }
}

/// Loader that runs an external command, e.g. an editor's CLI entry point.
///
/// Arguments may contain `{folder}`, `{maidata}` and `{track}` placeholders.
#[derive(Debug, Clone)]
pub struct CommandLoader {
    command: String,
    args: Vec<String>,
}

impl CommandLoader {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }

    /// Build a command loader from config, or `None` when no command is set.
    pub fn from_config(config: &LoaderConfig) -> Option<Self> {
        config
            .command
            .as_ref()
            .filter(|c| !c.trim().is_empty())
            .map(|c| Self::new(c.clone(), config.args.clone()))
    }

    /// Run the command to completion, inheriting stdout/stderr.
    pub fn run(&self, folder: &str, maidata: &str, track: &str) -> Result<(), CommandError> {
        let args = build_args(&self.args, folder, maidata, track);
        tracing::info!(command = %self.command, args = ?args, "running load command");

        let status = Command::new(&self.command)
            .args(&args)
            .stdin(Stdio::null())
            .status()
            .map_err(|e| CommandError::Spawn {
                command: self.command.clone(),
                source: e,
            })?;

        if !status.success() {
            return Err(CommandError::Failed {
                command: self.command.clone(),
                status,
            });
        }
        Ok(())
    }
}

impl ProjectLoader for CommandLoader {
    fn load_project(&self, folder: &str, maidata: &str, track: &str) -> Result<(), LoadError> {
        self.run(folder, maidata, track)?;
        Ok(())
    }
}

/// Replace `{folder}`, `{maidata}` and `{track}` placeholders in each argument.
fn build_args(args: &[String], folder: &str, maidata: &str, track: &str) -> Vec<String> {
    args.iter()
        .map(|arg| {
            arg.replace("{folder}", folder)
                .replace("{maidata}", maidata)
                .replace("{track}", track)
        })
        .collect()
}
