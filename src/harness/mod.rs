/// Namespace-scoped test wrapper
///
/// Binds a suite name and a target namespace to the command/polling
/// primitives. Every logged operation gets a sequential step number,
/// a step-specific log directory, and an unconditional dump of the
/// namespace's cluster logs when the step's scope exits. Cluster-side
/// failures are often only diagnosable from the workload's own logs,
/// and those logs disappear once pods are deleted, so capture runs on
/// the success path too.
use anyhow::Result;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::kubectl::{self, KubeCmd};
use crate::utils::command::Runner;
use crate::utils::polling;

/// Set to "true" to keep the namespace around after `terminate`.
pub const ENV_NO_CLEANUP: &str = "KUBEHARNESS_NO_CLEANUP";

const DEFAULT_LOG_ROOT: &str = "build/kubectl_dump";

/// One test suite's view of the cluster. Owns the step counter, so a
/// suite must drive it from a single thread of control; `&mut self` on
/// the logged operations enforces that.
pub struct TestNamespace {
    suite_name: String,
    namespace: String,
    log_dir: PathBuf,
    runner: Runner,
    step_counter: u32,
}

impl TestNamespace {
    pub fn new(suite_name: &str, namespace: &str) -> Self {
        Self::with_runner(suite_name, namespace, Runner::default(), DEFAULT_LOG_ROOT)
    }

    /// Like [`new`](Self::new), with an explicit runner and log root.
    pub fn with_runner(
        suite_name: &str,
        namespace: &str,
        runner: Runner,
        log_root: impl AsRef<Path>,
    ) -> Self {
        Self {
            suite_name: suite_name.to_string(),
            namespace: namespace.to_string(),
            log_dir: gen_suite_log_dir(log_root.as_ref(), suite_name),
            runner,
            step_counter: 1,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn suite_name(&self) -> &str {
        &self.suite_name
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    pub fn current_step(&self) -> u32 {
        self.step_counter
    }

    fn count_step(&mut self) -> u32 {
        let step = self.step_counter;
        self.step_counter += 1;
        step
    }

    fn gen_step_log_dir(&mut self, description: &str) -> PathBuf {
        let dir_name = format!(
            "{:02}_{}",
            self.count_step(),
            sanitize_for_log_dirs(description)
        );
        self.log_dir.join(dir_name)
    }

    fn fail(&self, description: &str, cmd: &KubeCmd, err: &anyhow::Error) -> ! {
        panic!(
            "Step '{}' failed running '{} {}': {:#}",
            description,
            self.runner.program(),
            cmd.to_cli_args().join(" "),
            err
        );
    }

    // ---- pass-through operations (namespace injected, Result out) ----

    pub async fn exec(&self, cmd: &KubeCmd) -> Result<()> {
        self.runner.exec(&cmd.in_namespace(&self.namespace)).await
    }

    pub async fn output(&self, cmd: &KubeCmd) -> Result<String> {
        self.runner.output(&cmd.in_namespace(&self.namespace)).await
    }

    pub async fn output_with_input(&self, cmd: &KubeCmd, input: &str) -> Result<String> {
        self.runner
            .output_with_input(&cmd.in_namespace(&self.namespace), input)
            .await
    }

    pub async fn wait_for_output(&self, cmd: &KubeCmd, expected: &str, seconds: u64) -> Result<()> {
        polling::wait_for_output(
            &self.runner,
            &cmd.in_namespace(&self.namespace),
            expected,
            seconds,
        )
        .await
    }

    pub async fn wait_for_output_contains(
        &self,
        cmd: &KubeCmd,
        expected: &str,
        seconds: u64,
    ) -> Result<()> {
        polling::wait_for_output_contains(
            &self.runner,
            &cmd.in_namespace(&self.namespace),
            expected,
            seconds,
        )
        .await
    }

    pub async fn wait_for_output_pattern(
        &self,
        cmd: &KubeCmd,
        pattern: &str,
        seconds: u64,
    ) -> Result<()> {
        polling::wait_for_output_pattern(
            &self.runner,
            &cmd.in_namespace(&self.namespace),
            pattern,
            seconds,
        )
        .await
    }

    // ---- logged, asserting operations (one step each) ----

    /// Execute the command as one numbered step. A failure is fatal to
    /// the enclosing scenario.
    pub async fn exec_and_log(&mut self, description: &str, cmd: &KubeCmd) {
        info!("Step: {}", description);
        let step_dir = self.gen_step_log_dir(description);
        let _dump = StepGuard::new(&self.runner, &self.namespace, step_dir);
        if let Err(err) = self.exec(cmd).await {
            self.fail(description, cmd, &err);
        }
    }

    /// Execute a command that is expected to fail, asserting that the
    /// failure text contains `expected_error`.
    pub async fn exec_and_log_expect_error(
        &mut self,
        description: &str,
        cmd: &KubeCmd,
        expected_error: &str,
    ) {
        info!("Step: {}", description);
        let step_dir = self.gen_step_log_dir(description);
        let _dump = StepGuard::new(&self.runner, &self.namespace, step_dir);
        match self.exec(cmd).await {
            Ok(()) => panic!(
                "Step '{}' expected '{} {}' to fail, but it succeeded",
                description,
                self.runner.program(),
                cmd.to_cli_args().join(" ")
            ),
            Err(err) => {
                let msg = format!("{:#}", err);
                if !msg.contains(expected_error) {
                    panic!(
                        "Step '{}' failed as expected, but without '{}': {}",
                        description, expected_error, msg
                    );
                }
            }
        }
    }

    /// Capture the command's output as one numbered step.
    pub async fn output_and_log(&mut self, description: &str, cmd: &KubeCmd) -> String {
        info!("Step: {}", description);
        let step_dir = self.gen_step_log_dir(description);
        let _dump = StepGuard::new(&self.runner, &self.namespace, step_dir);
        match self.output(cmd).await {
            Ok(text) => text,
            Err(err) => self.fail(description, cmd, &err),
        }
    }

    /// Poll the command until its output equals `expected`, as one
    /// numbered step.
    pub async fn wait_for_output_and_log(
        &mut self,
        description: &str,
        cmd: &KubeCmd,
        expected: &str,
        seconds: u64,
    ) {
        info!("Step: {}", description);
        let step_dir = self.gen_step_log_dir(description);
        let _dump = StepGuard::new(&self.runner, &self.namespace, step_dir);
        if let Err(err) = self.wait_for_output(cmd, expected, seconds).await {
            self.fail(description, cmd, &err);
        }
    }

    /// Poll the command until its output contains `expected`, as one
    /// numbered step.
    pub async fn wait_for_output_contains_and_log(
        &mut self,
        description: &str,
        cmd: &KubeCmd,
        expected: &str,
        seconds: u64,
    ) {
        info!("Step: {}", description);
        let step_dir = self.gen_step_log_dir(description);
        let _dump = StepGuard::new(&self.runner, &self.namespace, step_dir);
        if let Err(err) = self.wait_for_output_contains(cmd, expected, seconds).await {
            self.fail(description, cmd, &err);
        }
    }

    /// Poll the command until its output matches `pattern`, as one
    /// numbered step.
    pub async fn wait_for_output_pattern_and_log(
        &mut self,
        description: &str,
        cmd: &KubeCmd,
        pattern: &str,
        seconds: u64,
    ) {
        info!("Step: {}", description);
        let step_dir = self.gen_step_log_dir(description);
        let _dump = StepGuard::new(&self.runner, &self.namespace, step_dir);
        if let Err(err) = self.wait_for_output_pattern(cmd, pattern, seconds).await {
            self.fail(description, cmd, &err);
        }
    }

    /// Delete the namespace. The log directory tree is left on disk as
    /// a run artifact. Set [`ENV_NO_CLEANUP`] to "true" to skip.
    pub async fn terminate(self) -> Result<()> {
        let no_cleanup = std::env::var(ENV_NO_CLEANUP).unwrap_or_default();
        if no_cleanup.eq_ignore_ascii_case("true") {
            info!("Skipping namespace cleanup and deletion");
            return Ok(());
        }

        info!("Cleaning up and deleting namespace {}", self.namespace);
        self.runner
            .exec(&kubectl::delete_by_type_and_name(
                "namespace",
                [self.namespace.as_str()],
            ))
            .await
    }
}

/// Scope token for one step. Dropping it dumps the namespace's cluster
/// logs into the step directory, on every exit path including panics.
/// `Drop` cannot await, so the dump shells out synchronously.
struct StepGuard {
    runner: Runner,
    namespace: String,
    dir: PathBuf,
}

impl StepGuard {
    fn new(runner: &Runner, namespace: &str, dir: PathBuf) -> Self {
        Self {
            runner: runner.clone(),
            namespace: namespace.to_string(),
            dir,
        }
    }
}

impl Drop for StepGuard {
    fn drop(&mut self) {
        let cmd = kubectl::dump_logs(&self.dir, &self.namespace);
        let status = std::process::Command::new(self.runner.program())
            .args(self.runner.cli_args(&cmd))
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status();
        match status {
            Ok(status) if status.success() => {}
            Ok(status) => warn!(
                "Log dump for {} exited with {}",
                self.dir.display(),
                status
            ),
            Err(err) => warn!("Log dump for {} failed to start: {}", self.dir.display(), err),
        }
    }
}

/// Replace whitespace, path separators, dashes, dots and commas with
/// underscores so descriptions and suite names are safe directory
/// names.
fn sanitize_for_log_dirs(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_whitespace() || matches!(c, '\\' | '/' | '-' | '.' | ',') {
                '_'
            } else {
                c
            }
        })
        .collect()
}

/// `<root>/<sanitized-suite-name>/<timestamp>` so repeated runs of the
/// same suite never collide on disk.
fn gen_suite_log_dir(root: &Path, suite_name: &str) -> PathBuf {
    let datetime = chrono::Local::now().format("%Y.%m.%d_%H:%M:%S");
    root.join(sanitize_for_log_dirs(suite_name))
        .join(datetime.to_string())
}
