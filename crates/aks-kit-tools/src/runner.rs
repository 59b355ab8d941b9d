//! Command runner abstraction for external binaries.
//!
//! `CommandRunner` is the seam every tool wrapper goes through.
//! `ProcessRunner` is the production implementation on top of
//! `tokio::process`; `MockRunner` records invocations and replays canned
//! outputs for tests.

use std::fmt;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::error::{Result, ToolError};

/// A single program invocation.
#[derive(Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Program name or path.
    pub program: String,
    /// Arguments, not shell-interpreted.
    pub args: Vec<String>,
    /// Data written to the child's standard input, if any.
    pub stdin: Option<String>,
}

impl Invocation {
    /// Start an invocation of `program` with no arguments.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
        }
    }

    /// Append one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Feed `input` to the child's standard input.
    #[must_use]
    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }
}

// Stdin can carry registry passwords, so it is never printed.
impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("stdin", &self.stdin.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` if the process was killed by a signal.
    pub code: Option<i32>,
    /// Standard output, lossily decoded.
    pub stdout: String,
    /// Standard error, lossily decoded.
    pub stderr: String,
}

impl CommandOutput {
    /// A successful output with the given stdout.
    #[must_use]
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// A failed output with the given exit code and stderr.
    #[must_use]
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Whether the process exited with code zero.
    #[must_use]
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Trait for executing external programs.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run the invocation and capture its output.
    ///
    /// A non-zero exit is not an error at this level.
    ///
    /// # Errors
    ///
    /// Returns `ToolError::NotInstalled` if the program cannot be found and
    /// `ToolError::Io` for other spawn or pipe failures.
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput>;

    /// Run the invocation and return stdout, failing on a non-zero exit.
    ///
    /// # Errors
    ///
    /// Returns `ToolError::Failed` carrying stderr on a non-zero exit.
    async fn run_checked(&self, invocation: &Invocation) -> Result<String> {
        let output = self.run(invocation).await?;
        if output.success() {
            Ok(output.stdout)
        } else {
            tracing::debug!(
                command = %invocation,
                code = ?output.code,
                "Command exited unsuccessfully"
            );
            Err(ToolError::Failed {
                program: invocation.program.clone(),
                code: output.code,
                stderr: output.stderr.trim().to_string(),
            })
        }
    }
}

/// Production runner that spawns the program directly, without a shell.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
        tracing::debug!(command = %invocation, "Running external command");

        let mut command = tokio::process::Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if invocation.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ToolError::NotInstalled {
                    program: invocation.program.clone(),
                }
            } else {
                ToolError::Io(e)
            }
        })?;

        // Feed stdin while stdout and stderr drain; a child that fills its
        // output pipe before reading all input would otherwise block forever.
        let stdin = child.stdin.take();
        let input = invocation.stdin.as_deref();
        let feed = async move {
            if let (Some(input), Some(mut stdin)) = (input, stdin) {
                stdin.write_all(input.as_bytes()).await?;
                stdin.shutdown().await?;
            }
            Ok::<(), std::io::Error>(())
        };
        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output?;
        match fed {
            // The child may exit without reading all of its input.
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                tracing::debug!(command = %invocation, "Child closed stdin early");
            }
            other => other?,
        }

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Test-double runner that records invocations and replays preset outputs.
///
/// Once the preset outputs run out every call succeeds with empty stdout.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug, Default)]
pub struct MockRunner {
    responses: parking_lot::Mutex<std::collections::VecDeque<CommandOutput>>,
    invocations: parking_lot::Mutex<Vec<Invocation>>,
}

#[cfg(any(test, feature = "test-utils"))]
impl MockRunner {
    /// Create a mock with no preset outputs.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock that replays `responses` in order.
    #[must_use]
    pub fn with_responses(responses: Vec<CommandOutput>) -> Self {
        Self {
            responses: parking_lot::Mutex::new(responses.into()),
            invocations: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Queue one more output.
    pub fn push_response(&self, output: CommandOutput) {
        self.responses.lock().push_back(output);
    }

    /// Everything run so far, in order.
    #[must_use]
    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().clone()
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl CommandRunner for MockRunner {
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
        self.invocations.lock().push(invocation.clone());
        Ok(self
            .responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| CommandOutput::ok("")))
    }
}
