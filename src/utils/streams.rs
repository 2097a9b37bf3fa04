// src/utils/streams.rs
use std::fs::File;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use log::{debug, warn};
use tokio::process::Command;

use crate::config::defs::PipelineError;

/// One blocking call to an external tool, with optional file-backed stdin/stdout.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub tool: &'static str,
    pub args: Vec<String>,
    pub stdin: Option<PathBuf>,
    pub stdout: Option<PathBuf>,
}

impl ToolInvocation {
    pub fn new(tool: &'static str, args: Vec<String>) -> Self {
        ToolInvocation { tool, args, stdin: None, stdout: None }
    }

    pub fn stdin_from(mut self, path: &Path) -> Self {
        self.stdin = Some(path.to_path_buf());
        self
    }

    pub fn stdout_to(mut self, path: &Path) -> Self {
        self.stdout = Some(path.to_path_buf());
        self
    }

    /// Value following `flag` in the argument list.
    pub fn arg_value(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }

    pub fn command_line(&self) -> String {
        let mut line = format!("{} {}", self.tool, self.args.join(" "));
        if let Some(stdin) = &self.stdin {
            line.push_str(&format!(" < {}", stdin.display()));
        }
        if let Some(stdout) = &self.stdout {
            line.push_str(&format!(" > {}", stdout.display()));
        }
        line
    }
}


/// Runs external tools to completion. A non-zero exit is an error; there are
/// no retries and no timeouts.
pub trait ToolRunner {
    fn run(&self, invocation: &ToolInvocation) -> impl Future<Output = Result<(), PipelineError>>;
}


/// Spawns real processes. Each child is owned by the call that spawned it and
/// killed if that call is dropped before the child exits.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl ToolRunner for ProcessRunner {
    async fn run(&self, invocation: &ToolInvocation) -> Result<(), PipelineError> {
        debug!("Running: {}", invocation.command_line());
        let tool_error = |error: String| PipelineError::ToolExecution {
            tool: invocation.tool.to_string(),
            error,
        };

        let stdin = match &invocation.stdin {
            Some(path) => Stdio::from(File::open(path).map_err(|e| tool_error(format!("cannot open {}: {}", path.display(), e)))?),
            None => Stdio::null(),
        };
        let stdout = match &invocation.stdout {
            Some(path) => Stdio::from(File::create(path).map_err(|e| tool_error(format!("cannot create {}: {}", path.display(), e)))?),
            None => Stdio::null(),
        };

        let child = Command::new(invocation.tool)
            .args(&invocation.args)
            .stdin(stdin)
            .stdout(stdout)
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| tool_error(format!("failed to spawn: {}. Is {} installed?", e, invocation.tool)))?;

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| tool_error(format!("failed to wait: {}", e)))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        for line in stderr.lines() {
            debug!("{}: {}", invocation.tool, line);
        }

        if !output.status.success() {
            let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
            let tail: Vec<&str> = tail.into_iter().rev().collect();
            warn!("{} exited with {}", invocation.tool, output.status);
            return Err(tool_error(format!("exited with {}: {}", output.status, tail.join(" | "))));
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_invocation_helpers() {
        let inv = ToolInvocation::new("blastn", vec!["-query".to_string(), "q.fasta".to_string()])
            .stdout_to(Path::new("out.tsv"));
        assert_eq!(inv.arg_value("-query"), Some("q.fasta"));
        assert_eq!(inv.arg_value("-db"), None);
        assert_eq!(inv.command_line(), "blastn -query q.fasta > out.tsv");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_runner_redirects() -> Result<(), PipelineError> {
        let dir = tempdir()?;
        let input = dir.path().join("in.txt");
        let output = dir.path().join("out.txt");
        fs::write(&input, "@r1\nACGT\n")?;

        let inv = ToolInvocation::new("cat", vec![]).stdin_from(&input).stdout_to(&output);
        ProcessRunner.run(&inv).await?;
        assert_eq!(fs::read_to_string(&output)?, "@r1\nACGT\n");
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_runner_reports_failure() {
        let inv = ToolInvocation::new("false", vec![]);
        match ProcessRunner.run(&inv).await {
            Err(PipelineError::ToolExecution { tool, .. }) => assert_eq!(tool, "false"),
            other => panic!("Expected ToolExecution, got {:?}", other),
        }
    }
}
