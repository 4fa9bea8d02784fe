//! Worker that runs an external hook command per check.
//!
//! Exit status 0 means the check ran and reported, [`SOFT_FAILURE_EXIT_CODE`]
//! means there was nothing to report; anything else is a hard error.

use crate::model::{CheckAlert, WorkItem};
use anyhow::{Context, anyhow};
use secrecy::{ExposeSecret, SecretString};
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Exit status a hook uses to signal "nothing to report".
pub const SOFT_FAILURE_EXIT_CODE: i32 = 3;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug)]
pub struct HookWorker {
    command: PathBuf,
    args: Vec<String>,
    webhook_url: Option<SecretString>,
    timeout: Duration,
}

impl HookWorker {
    pub fn new(command: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            webhook_url: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn webhook_url(mut self, url: Option<SecretString>) -> Self {
        self.webhook_url = url;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run the hook for one check. The child is killed on cancellation or
    /// timeout.
    pub async fn run(&self, cancel: CancellationToken, alert: CheckAlert) -> anyhow::Result<bool> {
        // Relative paths resolve against the process CWD; bare names go through PATH.
        let command = if self.command.is_relative() && self.command.components().count() > 1 {
            std::env::current_dir()?.join(&self.command)
        } else {
            self.command.clone()
        };

        let key = alert.key();
        debug!(%key, command = %command.display(), "running hook");

        let mut cmd = Command::new(&command);
        cmd.args(&self.args)
            .env("PULSE_NETWORK", &alert.network)
            .env("PULSE_CLIENT", &alert.client)
            .env("PULSE_KEY", &key)
            .env("PULSE_ITEM", serde_json::to_string(&alert)?)
            .kill_on_drop(true);
        if let Some(url) = &self.webhook_url {
            cmd.env("PULSE_WEBHOOK_URL", url.expose_secret());
        }

        let status = tokio::select! {
            _ = cancel.cancelled() => return Err(anyhow!("hook for {key} cancelled")),
            result = tokio::time::timeout(self.timeout, cmd.status()) => result
                .map_err(|_| anyhow!("hook for {key} timed out after {:?}", self.timeout))?
                .with_context(|| format!("failed to run hook {}", command.display()))?,
        };

        match status.code() {
            Some(0) => Ok(true),
            Some(SOFT_FAILURE_EXIT_CODE) => Ok(false),
            Some(code) => Err(anyhow!("hook for {key} exited with status {code}")),
            None => Err(anyhow!("hook for {key} terminated by signal")),
        }
    }
}
