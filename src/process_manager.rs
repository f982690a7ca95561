// comfy-package-installer/src/process_manager.rs

use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use log::{debug, error, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use uuid::Uuid;

use crate::config::ProcessEnv;
use crate::error::{InstallerError, Result};

/// A fully described external command. Steps build these and hand them to a
/// [`CommandRunner`]; nothing in the pipeline spawns processes directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub current_dir: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    /// Human readable step name used in logs and error messages.
    pub description: String,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            env: BTreeMap::new(),
            description: description.into(),
        }
    }

    pub fn arg(mut self, arg: impl AsRef<std::ffi::OsStr>) -> Self {
        self.args.push(arg.as_ref().to_string_lossy().into_owned());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        for arg in args {
            self = self.arg(arg);
        }
        self
    }

    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.current_dir = Some(dir.to_path_buf());
        self
    }

    pub fn envs(mut self, env: &ProcessEnv) -> Self {
        for (key, value) in env.iter() {
            self.env.insert(key.to_string(), value.to_string());
        }
        self
    }

    /// `program arg1 arg2 ...`, used for logging and for matching in tests.
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    fn log_name(&self) -> String {
        Path::new(&self.program)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.clone())
    }
}

/// Final result of an external command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandResult {
    pub exit_code: Option<i32>,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

impl CommandResult {
    pub fn succeeded() -> Self {
        Self {
            exit_code: Some(0),
            ..Default::default()
        }
    }

    pub fn failed(exit_code: i32, stderr: &str) -> Self {
        Self {
            exit_code: Some(exit_code),
            stdout: Vec::new(),
            stderr: stderr.lines().map(str::to_string).collect(),
        }
    }

    pub fn with_stdout(mut self, stdout: &str) -> Self {
        self.stdout = stdout.lines().map(str::to_string).collect();
        self
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

impl fmt::Display for CommandResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.exit_code {
            Some(code) => write!(f, "exit code {}", code),
            None => write!(f, "termination by signal"),
        }
    }
}

/// Executes external commands for the installation steps.
///
/// Every step is generic over this trait so the whole pipeline can run against
/// [`RecordingRunner`] in tests.
#[allow(async_fn_in_trait)]
pub trait CommandRunner {
    /// Runs the command to completion with captured output. A non-zero exit is
    /// not an error at this level.
    async fn run(&self, spec: &CommandSpec) -> Result<CommandResult>;

    /// Runs the command with the terminal attached (used for launching ComfyUI).
    async fn run_attached(&self, spec: &CommandSpec) -> Result<CommandResult>;

    /// Runs the command and turns a non-zero exit into [`InstallerError::CommandFailed`].
    async fn run_checked(&self, spec: &CommandSpec) -> Result<CommandResult> {
        let result = self.run(spec).await?;
        if result.success() {
            return Ok(result);
        }
        Err(InstallerError::CommandFailed {
            description: spec.description.clone(),
            command: spec.command_line(),
            status: result.to_string(),
            stderr: result.stderr.join("\n").trim().to_string(),
        })
    }

    /// Whether `tool` resolves on `PATH`.
    async fn is_available(&self, tool: &str) -> bool {
        let spec = CommandSpec::new("which", format!("Locate {}", tool)).arg(tool);
        match self.run(&spec).await {
            Ok(result) => result.success(),
            Err(e) => {
                debug!("Could not look up {}: {}", tool, e);
                false
            }
        }
    }
}

/// Runs commands on the host with `tokio::process`, streaming their output into the log.
pub struct SystemRunner {
    failure_log_dir: PathBuf,
}

impl SystemRunner {
    /// `failure_log_dir` receives the full output of every command that fails.
    pub fn new(failure_log_dir: impl Into<PathBuf>) -> Self {
        Self {
            failure_log_dir: failure_log_dir.into(),
        }
    }

    fn build_command(spec: &CommandSpec) -> Command {
        let mut command = Command::new(&spec.program);
        command.args(&spec.args).envs(&spec.env);
        if let Some(dir) = &spec.current_dir {
            command.current_dir(dir);
        }
        command
    }

    async fn write_failure_log(&self, spec: &CommandSpec, result: &CommandResult) -> Option<PathBuf> {
        if let Err(e) = tokio::fs::create_dir_all(&self.failure_log_dir).await {
            warn!("Failed to create command log directory {}: {}", self.failure_log_dir.display(), e);
            return None;
        }
        let log_path = self
            .failure_log_dir
            .join(format!("command_output_{}.log", Uuid::new_v4()));
        let mut content = format!("$ {}\n", spec.command_line());
        for line in result.stdout.iter().chain(result.stderr.iter()) {
            content.push_str(line);
            content.push('\n');
        }
        match tokio::fs::write(&log_path, content).await {
            Ok(()) => Some(log_path),
            Err(e) => {
                warn!("Failed to write command log {}: {}", log_path.display(), e);
                None
            }
        }
    }
}

impl CommandRunner for SystemRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandResult> {
        let process_name = spec.log_name();
        info!("Executing: {}", spec.command_line());

        let mut child = Self::build_command(spec)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| InstallerError::CommandSpawn {
                program: spec.program.clone(),
                source,
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let read_stdout = async {
            let mut lines = Vec::new();
            if let Some(stdout) = stdout {
                let mut reader = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    info!("[{}_stdout] {}", process_name, line);
                    lines.push(line);
                }
            }
            lines
        };
        let read_stderr = async {
            let mut lines = Vec::new();
            if let Some(stderr) = stderr {
                let mut reader = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    warn!("[{}_stderr] {}", process_name, line);
                    lines.push(line);
                }
            }
            lines
        };
        let (stdout_lines, stderr_lines) = tokio::join!(read_stdout, read_stderr);

        let status = child.wait().await.map_err(|source| InstallerError::CommandSpawn {
            program: spec.program.clone(),
            source,
        })?;

        let result = CommandResult {
            exit_code: status.code(),
            stdout: stdout_lines,
            stderr: stderr_lines,
        };

        if result.success() {
            debug!("'{}' completed successfully", spec.description);
        } else {
            error!("'{}' failed with {}", spec.description, result);
            if let Some(log_path) = self.write_failure_log(spec, &result).await {
                error!("Full command output written to {}", log_path.display());
            }
        }
        Ok(result)
    }

    async fn run_attached(&self, spec: &CommandSpec) -> Result<CommandResult> {
        info!("Executing (attached): {}", spec.command_line());
        let status = Self::build_command(spec)
            .status()
            .await
            .map_err(|source| InstallerError::CommandSpawn {
                program: spec.program.clone(),
                source,
            })?;
        Ok(CommandResult {
            exit_code: status.code(),
            ..Default::default()
        })
    }
}

/// Runner that records every command instead of executing it and answers with
/// scripted results. Used by the test suites.
#[derive(Debug, Default)]
pub struct RecordingRunner {
    invocations: RefCell<Vec<CommandSpec>>,
    responses: RefCell<Vec<(String, CommandResult)>>,
    missing_tools: RefCell<HashSet<String>>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// `which <tool>` will report the tool as absent.
    pub fn with_missing_tool(self, tool: &str) -> Self {
        self.missing_tools.borrow_mut().insert(tool.to_string());
        self
    }

    /// Any command whose command line contains `pattern` answers with `result`.
    pub fn respond_to(self, pattern: &str, result: CommandResult) -> Self {
        self.responses.borrow_mut().push((pattern.to_string(), result));
        self
    }

    /// Any command whose command line contains `pattern` exits with status 1.
    pub fn fail_on(self, pattern: &str) -> Self {
        self.respond_to(pattern, CommandResult::failed(1, "scripted failure"))
    }

    pub fn invocations(&self) -> Vec<CommandSpec> {
        self.invocations.borrow().clone()
    }

    /// Recorded command lines, excluding `which` lookups.
    pub fn command_lines(&self) -> Vec<String> {
        self.invocations
            .borrow()
            .iter()
            .filter(|spec| spec.program != "which")
            .map(CommandSpec::command_line)
            .collect()
    }

    fn answer(&self, spec: &CommandSpec) -> CommandResult {
        if spec.program == "which" {
            let missing = spec
                .args
                .first()
                .is_some_and(|tool| self.missing_tools.borrow().contains(tool));
            return if missing {
                CommandResult::failed(1, "")
            } else {
                CommandResult::succeeded()
            };
        }
        let line = spec.command_line();
        self.responses
            .borrow()
            .iter()
            .find(|(pattern, _)| line.contains(pattern.as_str()))
            .map(|(_, result)| result.clone())
            .unwrap_or_else(CommandResult::succeeded)
    }
}

impl CommandRunner for RecordingRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandResult> {
        self.invocations.borrow_mut().push(spec.clone());
        Ok(self.answer(spec))
    }

    async fn run_attached(&self, spec: &CommandSpec) -> Result<CommandResult> {
        self.run(spec).await
    }
}
