//! Subprocess layer for the `git` binary.
//!
//! Every invocation goes through a [`CommandExecutor`], which never fails for
//! a nonzero exit: callers get the raw [`CommandOutput`] and decide what the
//! exit code means. [`GitCli`] layers the non-interactive environment and the
//! resolved SSH credentials on top, and offers a checked variant that turns a
//! failed command into a [`GitCliError`].
use std::{
    ffi::{OsStr, OsString},
    path::{Path, PathBuf},
    process::Stdio,
    sync::Arc,
};

use async_trait::async_trait;
use thiserror::Error;
use tokio::{process::Command, sync::OnceCell};
use utils::shell::resolve_executable_path;

use crate::credentials::{CredentialError, CredentialResolver, ssh_command_for_key};

#[derive(Debug, Error)]
pub enum GitCliError {
    #[error("git command failed: {0}")]
    CommandFailed(String),
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    #[error("push rejected: {0}")]
    PushRejected(String),
    #[error(transparent)]
    Credential(#[from] CredentialError),
}

/// Captured result of one subprocess run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Output used when the process could not be started at all.
    pub fn spawn_failure(reason: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: reason.into(),
            exit_code: 1,
        }
    }

    /// stdout and stderr joined, for phrase matching.
    pub fn combined(&self) -> String {
        format!("{}\n{}", self.stdout, self.stderr)
    }

    /// Human readable failure text built from whichever streams are non-empty.
    pub fn failure_message(&self) -> String {
        let stderr = self.stderr.trim();
        let stdout = self.stdout.trim();
        match (stderr.is_empty(), stdout.is_empty()) {
            (true, true) => "Command failed with no output".to_string(),
            (false, false) => format!("--- stderr\n{stderr}\n--- stdout\n{stdout}"),
            (false, true) => format!("--- stderr\n{stderr}"),
            (true, false) => format!("--- stdout\n{stdout}"),
        }
    }
}

/// Runs an external program. Implementations must not return early with
/// partial output: a spawn failure is reported as exit code 1 with the reason
/// on stderr.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(
        &self,
        program: &OsStr,
        args: &[OsString],
        cwd: Option<&Path>,
        envs: &[(OsString, OsString)],
    ) -> CommandOutput;
}

#[derive(Debug, Clone, Default)]
pub struct SystemExecutor;

#[async_trait]
impl CommandExecutor for SystemExecutor {
    async fn run(
        &self,
        program: &OsStr,
        args: &[OsString],
        cwd: Option<&Path>,
        envs: &[(OsString, OsString)],
    ) -> CommandOutput {
        let mut cmd = Command::new(program);
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }
        cmd.args(args)
            .envs(envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::trace!(?cwd, "Running command: {:?}", cmd);

        match cmd.output().await {
            Ok(out) => CommandOutput {
                stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
                exit_code: out.status.code().unwrap_or(-1),
            },
            Err(e) => CommandOutput::spawn_failure(e.to_string()),
        }
    }
}

/// Thin wrapper over the `git` binary.
#[derive(Clone)]
pub struct GitCli {
    executor: Arc<dyn CommandExecutor>,
    credentials: Arc<CredentialResolver>,
    ssh_key: Option<PathBuf>,
    program: Arc<OnceCell<PathBuf>>,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new()
    }
}

impl GitCli {
    pub fn new() -> Self {
        Self::with_executor(Arc::new(SystemExecutor))
    }

    pub fn with_executor(executor: Arc<dyn CommandExecutor>) -> Self {
        let credentials = Arc::new(CredentialResolver::from_env(executor.clone()));
        Self {
            executor,
            credentials,
            ssh_key: None,
            program: Arc::new(OnceCell::new()),
        }
    }

    pub fn with_credentials(mut self, credentials: CredentialResolver) -> Self {
        self.credentials = Arc::new(credentials);
        self
    }

    /// Default key injected as `GIT_SSH_COMMAND` into every invocation.
    pub fn with_ssh_key(mut self, key: Option<PathBuf>) -> Self {
        self.ssh_key = key;
        self
    }

    pub fn executor(&self) -> &Arc<dyn CommandExecutor> {
        &self.executor
    }

    /// Environment applied to every git invocation and to post-create scripts.
    pub async fn environment(&self) -> Vec<(OsString, OsString)> {
        let mut envs: Vec<(OsString, OsString)> = vec![
            ("GIT_TERMINAL_PROMPT".into(), "0".into()),
            ("GCM_INTERACTIVE".into(), "never".into()),
        ];
        if let Some(sock) = self.credentials.agent_socket().await {
            envs.push(("SSH_AUTH_SOCK".into(), sock.into_os_string()));
        }
        if let Some(key) = &self.ssh_key {
            match ssh_command_for_key(key) {
                Ok(command) => envs.push(("GIT_SSH_COMMAND".into(), command.into())),
                Err(e) => tracing::warn!(key = ?key, "Ignoring configured SSH key: {e}"),
            }
        }
        envs
    }

    /// Run `git <args...>` inside `dir` and return the raw output.
    pub async fn run<I, S>(&self, dir: &Path, args: I) -> CommandOutput
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.run_with_env(dir, args, &[]).await
    }

    pub async fn run_with_env<I, S>(
        &self,
        dir: &Path,
        args: I,
        extra_envs: &[(OsString, OsString)],
    ) -> CommandOutput
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let args: Vec<OsString> = args
            .into_iter()
            .map(|a| a.as_ref().to_os_string())
            .collect();
        let mut envs = self.environment().await;
        envs.extend(extra_envs.iter().cloned());
        let program = self.program().await;
        tracing::trace!(repo = ?dir, ?args, "Running git command");
        self.executor
            .run(program.as_os_str(), &args, Some(dir), &envs)
            .await
    }

    /// Run `git <args...>` and return stdout, or an error built from the
    /// captured streams when the exit code is nonzero.
    pub async fn git<I, S>(&self, dir: &Path, args: I) -> Result<String, GitCliError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.git_with_env(dir, args, &[]).await
    }

    pub async fn git_with_env<I, S>(
        &self,
        dir: &Path,
        args: I,
        extra_envs: &[(OsString, OsString)],
    ) -> Result<String, GitCliError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let out = self.run_with_env(dir, args, extra_envs).await;
        if out.success() {
            Ok(out.stdout)
        } else {
            Err(Self::classify_cli_error(out.failure_message()))
        }
    }

    pub fn classify_cli_error(msg: String) -> GitCliError {
        let lower = msg.to_ascii_lowercase();
        if lower.contains("authentication failed")
            || lower.contains("could not read username")
            || lower.contains("invalid username or password")
            || lower.contains("permission denied (publickey")
        {
            GitCliError::AuthFailed(msg)
        } else if lower.contains("non-fast-forward")
            || lower.contains("failed to push some refs")
            || lower.contains("fetch first")
            || lower.contains("updates were rejected because the tip")
        {
            GitCliError::PushRejected(msg)
        } else {
            GitCliError::CommandFailed(msg)
        }
    }

    async fn program(&self) -> PathBuf {
        self.program
            .get_or_init(|| async {
                resolve_executable_path("git")
                    .await
                    .unwrap_or_else(|| PathBuf::from("git"))
            })
            .await
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawn_failure_reports_exit_one_and_reason() {
        let out = SystemExecutor
            .run(
                OsStr::new("definitely-not-a-real-binary-4f1c"),
                &[],
                None,
                &[],
            )
            .await;
        assert_eq!(out.exit_code, 1);
        assert!(out.stdout.is_empty());
        assert!(!out.stderr.is_empty());
    }

    #[test]
    fn failure_message_uses_non_empty_streams() {
        let both = CommandOutput {
            stdout: "out\n".into(),
            stderr: "err\n".into(),
            exit_code: 1,
        };
        assert_eq!(both.failure_message(), "--- stderr\nerr\n--- stdout\nout");

        let only_err = CommandOutput {
            stderr: "fatal: nope".into(),
            exit_code: 128,
            ..Default::default()
        };
        assert_eq!(only_err.failure_message(), "--- stderr\nfatal: nope");

        let silent = CommandOutput {
            exit_code: 1,
            ..Default::default()
        };
        assert_eq!(silent.failure_message(), "Command failed with no output");
    }

    #[test]
    fn classify_distinguishes_auth_and_rejection() {
        assert!(matches!(
            GitCli::classify_cli_error("fatal: Authentication failed for x".into()),
            GitCliError::AuthFailed(_)
        ));
        assert!(matches!(
            GitCli::classify_cli_error("! [rejected] main -> main (non-fast-forward)".into()),
            GitCliError::PushRejected(_)
        ));
        assert!(matches!(
            GitCli::classify_cli_error("fatal: not a git repository".into()),
            GitCliError::CommandFailed(_)
        ));
    }

    #[tokio::test]
    async fn environment_disables_prompts() {
        let cli = GitCli::new().with_credentials(CredentialResolver::disabled());
        let envs = cli.environment().await;
        assert!(
            envs.iter()
                .any(|(k, v)| k == "GIT_TERMINAL_PROMPT" && v == "0")
        );
        assert!(!envs.iter().any(|(k, _)| k == "SSH_AUTH_SOCK"));
    }

    #[tokio::test]
    async fn unsafe_configured_key_is_skipped() {
        let cli = GitCli::new()
            .with_credentials(CredentialResolver::disabled())
            .with_ssh_key(Some(PathBuf::from("/tmp/key; rm -rf /")));
        let envs = cli.environment().await;
        assert!(!envs.iter().any(|(k, _)| k == "GIT_SSH_COMMAND"));
    }
}
