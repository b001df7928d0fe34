//! Command specs and the logged process runner.
//!
//! Stages describe what they want to execute as a [`CommandSpec`] so that the
//! argument wiring can be tested without spawning anything. [`run_logged`]
//! is the single place that actually starts a child: it echoes the command
//! to the run log, streams the child's stdout and stderr into it line by
//! line, and waits for the exit status.

use std::{
    fmt::{self, Display},
    io,
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
};

use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::Command,
};

use crate::{log::RunLog, util::split_command};

/// Abstract command representation so we can test without spawning processes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program name or path, resolved through `PATH` by the OS.
    pub program: String,
    /// Arguments, passed without shell interpretation.
    pub args: Vec<String>,
    /// Variables added on top of the inherited environment.
    pub env: Vec<(String, String)>,
    /// Working directory; `None` inherits the runner's.
    pub cwd: Option<PathBuf>,
}

/// Renders as the shell-style trace line (`program arg1 arg2`).
impl Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_command_line(f, &self.program, &self.args)
    }
}

impl CommandSpec {
    /// Command with no arguments, extra environment or working directory.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            cwd: None,
        }
    }

    /// Run from `cwd`.
    pub fn in_dir(mut self, cwd: &Path) -> Self {
        self.cwd = Some(cwd.to_path_buf());
        self
    }

    /// Append `env` to the child's extra variables.
    pub fn with_env(mut self, env: &[(String, String)]) -> Self {
        self.env.extend(env.iter().cloned());
        self
    }
}

/// A configured command line whose arguments may carry `{name}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    /// First token of the configured command line.
    pub program: String,
    /// Remaining tokens, placeholders unexpanded.
    pub args: Vec<String>,
}

impl Display for CommandTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_command_line(f, &self.program, &self.args)
    }
}

fn write_command_line(
    f: &mut fmt::Formatter<'_>,
    program: &str,
    args: &[String],
) -> fmt::Result {
    f.write_str(program)?;
    for arg in args {
        write!(f, " {arg}")?;
    }
    Ok(())
}

impl CommandTemplate {
    /// Template from an already split command line.
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse a whitespace-separated command line. `None` for blank input.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut tokens = split_command(raw)?.into_iter();
        let program = tokens.next()?;
        Some(Self {
            program,
            args: tokens.collect(),
        })
    }

    /// Whether any argument mentions `{name}`.
    pub fn references(&self, name: &str) -> bool {
        let needle = format!("{{{name}}}");
        self.program.contains(&needle)
            || self.args.iter().any(|arg| arg.contains(&needle))
    }

    /// Substitute `{name}` placeholders with the bound paths.
    pub fn render(&self, bindings: &[(&str, &Path)]) -> CommandSpec {
        let substitute = |raw: &str| {
            bindings.iter().fold(raw.to_string(), |acc, (name, path)| {
                acc.replace(&format!("{{{name}}}"), &path.display().to_string())
            })
        };
        let mut spec = CommandSpec::new(substitute(self.program.as_str()));
        spec.args =
            self.args.iter().map(|arg| substitute(arg.as_str())).collect();
        spec
    }
}

/// Build the tokio [`Command`] described by `spec`.
pub fn to_command(spec: &CommandSpec) -> Command {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args);
    if !spec.env.is_empty() {
        cmd.envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    }
    if let Some(cwd) = &spec.cwd {
        cmd.current_dir(cwd);
    }
    cmd
}

/// Run `spec` to completion, mirroring its combined output into `log`.
///
/// Spawn failures (program not found, bad working directory) are returned as
/// errors and recorded by the caller; a non-zero exit is reported through the
/// returned status.
pub async fn run_logged(
    spec: &CommandSpec,
    log: &RunLog,
) -> io::Result<ExitStatus> {
    log.command(spec);

    let mut cmd = to_command(spec);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = cmd.spawn()?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let (status, out, err) = tokio::join!(
        child.wait(),
        forward_lines(stdout, log),
        forward_lines(stderr, log),
    );
    out?;
    err?;
    status
}

async fn forward_lines<R>(reader: Option<R>, log: &RunLog) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return Ok(());
    };
    let mut segments = BufReader::new(reader).split(b'\n');
    while let Some(segment) = segments.next_segment().await? {
        let line = String::from_utf8_lossy(&segment);
        log.output(line.trim_end_matches('\r'));
    }
    Ok(())
}
