/// Process execution for cluster-management commands
///
/// A `Runner` turns a [`KubeCmd`](crate::kubectl::KubeCmd) into one
/// external process and blocks until it exits. Spawn failures and
/// non-zero exits surface as the same error kind, carrying the best
/// diagnostic text available; callers that want retries wrap the call
/// in [`polling`](crate::utils::polling).
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::kubectl::KubeCmd;

#[derive(Debug, Clone)]
pub struct Runner {
    program: String,
    config_dir: Option<PathBuf>,
    verbose: bool,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new("kubectl")
    }
}

impl Runner {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            config_dir: None,
            verbose: false,
        }
    }

    /// Point the tool at a configuration directory override,
    /// rendered as leading `--config <dir>` arguments.
    pub fn config_dir(mut self, path: impl AsRef<Path>) -> Self {
        self.config_dir = Some(path.as_ref().to_path_buf());
        self
    }

    /// Stream stdout live during `exec` instead of suppressing it.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn cli_args(&self, cmd: &KubeCmd) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(dir) = &self.config_dir {
            args.push("--config".to_string());
            args.push(dir.display().to_string());
        }
        args.extend(cmd.to_cli_args());
        args
    }

    fn describe(&self, cmd: &KubeCmd) -> String {
        format!("{} {}", self.program, self.cli_args(cmd).join(" "))
    }

    /// Run the command for its side effect. Stdout is suppressed
    /// unless the runner is verbose; stderr is reported through the
    /// returned error on failure.
    pub async fn exec(&self, cmd: &KubeCmd) -> Result<()> {
        let rendered = self.describe(cmd);
        debug!("Executing: {}", rendered);

        if self.verbose {
            let status = Command::new(&self.program)
                .args(self.cli_args(cmd))
                .status()
                .await
                .with_context(|| format!("Failed to start: {}", rendered))?;
            if !status.success() {
                anyhow::bail!("Command failed ({}): {}", status, rendered);
            }
            return Ok(());
        }

        let output = Command::new(&self.program)
            .args(self.cli_args(cmd))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .with_context(|| format!("Failed to start: {}", rendered))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "Command failed ({}): {}\n{}",
                output.status,
                rendered,
                stderr.trim_end()
            );
        }
        Ok(())
    }

    /// Run the command and capture stdout, trimming exactly one
    /// trailing newline if present. Further trailing whitespace is
    /// kept so multi-line payloads come through intact.
    pub async fn output(&self, cmd: &KubeCmd) -> Result<String> {
        let rendered = self.describe(cmd);
        debug!("Capturing: {}", rendered);

        let output = Command::new(&self.program)
            .args(self.cli_args(cmd))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .with_context(|| format!("Failed to start: {}", rendered))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "Command failed ({}): {}\n{}",
                output.status,
                rendered,
                stderr.trim_end()
            );
        }

        Ok(trim_one_newline(
            String::from_utf8_lossy(&output.stdout).to_string(),
        ))
    }

    /// Like [`output`](Self::output), but writes `input` to the
    /// process's stdin first. Used for piping a password into an
    /// interactive login, for example.
    pub async fn output_with_input(&self, cmd: &KubeCmd, input: &str) -> Result<String> {
        let rendered = self.describe(cmd);
        debug!("Capturing (with stdin): {}", rendered);

        let mut child = Command::new(&self.program)
            .args(self.cli_args(cmd))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to start: {}", rendered))?;

        let mut stdin = child
            .stdin
            .take()
            .with_context(|| format!("Failed to open stdin: {}", rendered))?;
        stdin
            .write_all(input.as_bytes())
            .await
            .with_context(|| format!("Failed to write stdin: {}", rendered))?;
        drop(stdin);

        let output = child
            .wait_with_output()
            .await
            .with_context(|| format!("Failed to wait: {}", rendered))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "Command failed ({}): {}\n{}",
                output.status,
                rendered,
                stderr.trim_end()
            );
        }

        Ok(trim_one_newline(
            String::from_utf8_lossy(&output.stdout).to_string(),
        ))
    }
}

fn trim_one_newline(mut text: String) -> String {
    if text.ends_with('\n') {
        text.pop();
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kubectl::{self, KubeCmd};

    // `sh -c <script>` expressed as a KubeCmd
    fn sh_cmd(script: &str) -> KubeCmd {
        KubeCmd::new("-c").with_arg(script)
    }

    #[tokio::test]
    async fn test_output_trims_exactly_one_newline() {
        // echo appends one newline; it must come off and nothing more
        let out = Runner::new("echo")
            .output(&kubectl::get(["pods"]))
            .await
            .unwrap();
        assert_eq!(out, "get pods");

        // printf gives us control over trailing newlines
        let runner = Runner::new("printf");
        let out = runner.output(&KubeCmd::new("abc\n\n")).await.unwrap();
        assert_eq!(out, "abc\n");
        let out = runner.output(&KubeCmd::new("abc\n")).await.unwrap();
        assert_eq!(out, "abc");
        let out = runner.output(&KubeCmd::new("abc")).await.unwrap();
        assert_eq!(out, "abc");
    }

    #[tokio::test]
    async fn test_output_preserves_interior_structure() {
        let runner = Runner::new("printf");
        let out = runner
            .output(&KubeCmd::new("{\n  \"items\": []\n}\n"))
            .await
            .unwrap();
        assert_eq!(out, "{\n  \"items\": []\n}");
    }

    #[tokio::test]
    async fn test_config_dir_renders_first() {
        let runner = Runner::new("echo").config_dir("/tmp/toolcfg");
        let out = runner.output(&kubectl::get(["pods"])).await.unwrap();
        assert_eq!(out, "--config /tmp/toolcfg get pods");
    }

    #[tokio::test]
    async fn test_exec_nonzero_exit_is_error() {
        let runner = Runner::new("sh");
        let err = runner.exec(&sh_cmd("exit 3")).await.unwrap_err();
        assert!(err.to_string().contains("Command failed"));
    }

    #[tokio::test]
    async fn test_exec_missing_binary_is_error() {
        let runner = Runner::new("definitely-not-a-real-binary-kubeharness");
        let err = runner.exec(&kubectl::get(["pods"])).await.unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to start"));
    }

    #[tokio::test]
    async fn test_error_carries_stderr() {
        let runner = Runner::new("sh");
        let err = runner
            .output(&sh_cmd("echo oops >&2; exit 3"))
            .await
            .unwrap_err();
        let msg = format!("{:#}", err);
        assert!(msg.contains("oops"), "stderr missing from: {}", msg);
    }

    #[tokio::test]
    async fn test_output_with_input_pipes_stdin() {
        // `cat -` copies stdin to stdout
        let runner = Runner::new("cat");
        let out = runner
            .output_with_input(&KubeCmd::new("-"), "secret-password\n")
            .await
            .unwrap();
        assert_eq!(out, "secret-password");
    }

    #[tokio::test]
    async fn test_verbose_exec_streams() {
        let runner = Runner::new("echo").verbose(true);
        runner.exec(&kubectl::get(["pods"])).await.unwrap();
    }
}
