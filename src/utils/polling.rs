/// Poll-until-match for command output
///
/// Re-runs a capture-mode command at a fixed cadence until its output
/// satisfies a matcher or a deadline passes. Constant-interval polling
/// is deliberate: the things being waited on (pod startup, rolling
/// restarts) move on human timescales, and a fixed interval keeps the
/// worst-case wait easy to reason about.
use anyhow::Result;
use regex::Regex;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::kubectl::KubeCmd;
use crate::utils::command::Runner;

/// How captured output is judged. One closed set of predicate kinds,
/// evaluated in one place, so the retry loop's timing logic is not
/// duplicated per kind.
#[derive(Debug, Clone)]
pub enum Matcher {
    /// Whole-output equality. An empty expected string is a valid
    /// target (asserting the absence of a field).
    Exact(String),
    Contains(String),
    Pattern(Regex),
}

impl Matcher {
    pub fn exact(expected: impl Into<String>) -> Self {
        Self::Exact(expected.into())
    }

    pub fn contains(expected: impl Into<String>) -> Self {
        Self::Contains(expected.into())
    }

    pub fn pattern(pattern: &str) -> Result<Self> {
        Ok(Self::Pattern(Regex::new(pattern)?))
    }

    pub fn is_match(&self, text: &str) -> bool {
        match self {
            Self::Exact(expected) => text == expected,
            Self::Contains(expected) => text.contains(expected),
            Self::Pattern(re) => re.is_match(text),
        }
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(expected) => write!(f, "output to equal '{}'", expected),
            Self::Contains(expected) => write!(f, "output to contain '{}'", expected),
            Self::Pattern(re) => write!(f, "output to match regex '{}'", re),
        }
    }
}

/// Timing and failure policy for one wait.
#[derive(Debug, Clone)]
pub struct WaitSpec {
    pub interval: Duration,
    pub timeout: Duration,
    /// When set, a command failure during polling fails the wait
    /// immediately. Otherwise failures count as "not yet matching",
    /// so polling can start before the target resource exists.
    pub require_success: bool,
}

impl WaitSpec {
    pub fn timeout_secs(seconds: u64) -> Self {
        Self {
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(seconds),
            require_success: false,
        }
    }

    pub fn require_success(mut self) -> Self {
        self.require_success = true;
        self
    }
}

/// Repeatedly capture `cmd` output until `matcher` is satisfied or the
/// deadline passes. The timeout error carries the last observed output
/// so "never reached state X" can be told apart from "command itself
/// is broken".
pub async fn wait_for(
    runner: &Runner,
    cmd: &KubeCmd,
    matcher: &Matcher,
    spec: &WaitSpec,
) -> Result<()> {
    let start = Instant::now();
    let mut last_output = String::new();
    let mut last_err: Option<anyhow::Error> = None;
    let mut attempts = 0u32;

    loop {
        match runner.output(cmd).await {
            Ok(text) => {
                if matcher.is_match(&text) {
                    debug!("Matched after {} attempt(s)", attempts + 1);
                    return Ok(());
                }
                last_output = text;
                last_err = None;
            }
            Err(err) => {
                if spec.require_success {
                    return Err(
                        err.context(format!("Command failed while waiting for {}", matcher))
                    );
                }
                last_err = Some(err);
            }
        }
        attempts += 1;

        if start.elapsed() >= spec.timeout {
            let mut msg = format!(
                "Timed out after {}s waiting for {}; last output was '{}'",
                spec.timeout.as_secs(),
                matcher,
                last_output
            );
            if let Some(err) = last_err {
                msg = format!("{}\nThe last query error was: {:#}", msg, err);
            }
            anyhow::bail!(msg);
        }

        tokio::time::sleep(spec.interval).await;
    }
}

pub async fn wait_for_output(
    runner: &Runner,
    cmd: &KubeCmd,
    expected: &str,
    seconds: u64,
) -> Result<()> {
    wait_for(
        runner,
        cmd,
        &Matcher::exact(expected),
        &WaitSpec::timeout_secs(seconds),
    )
    .await
}

pub async fn wait_for_output_contains(
    runner: &Runner,
    cmd: &KubeCmd,
    expected: &str,
    seconds: u64,
) -> Result<()> {
    wait_for(
        runner,
        cmd,
        &Matcher::contains(expected),
        &WaitSpec::timeout_secs(seconds),
    )
    .await
}

pub async fn wait_for_output_pattern(
    runner: &Runner,
    cmd: &KubeCmd,
    pattern: &str,
    seconds: u64,
) -> Result<()> {
    wait_for(
        runner,
        cmd,
        &Matcher::pattern(pattern)?,
        &WaitSpec::timeout_secs(seconds),
    )
    .await
}
