//! SSH credential environment for git subprocesses.
use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use thiserror::Error;
use tokio::sync::Mutex;

use crate::cli::CommandExecutor;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CredentialError {
    #[error("SSH key path is empty")]
    EmptyKeyPath,
    #[error("SSH key path is not valid UTF-8")]
    NonUtf8KeyPath,
    #[error("SSH key path {path:?} contains forbidden character {character:?}")]
    UnsafeKeyPath { path: String, character: char },
}

/// Characters that would let a key path escape the quoted `ssh -i "<path>"` word.
const FORBIDDEN_KEY_CHARS: &[char] = &[
    ';', '&', '|', '`', '$', '(', ')', '<', '>', '"', '\'', '!', '*', '?', '[', ']', '{', '}',
    '\n', '\r',
];

const GPGCONF_CANDIDATES: &[&str] = &[
    "gpgconf",
    "/opt/homebrew/bin/gpgconf",
    "/usr/local/bin/gpgconf",
    "/usr/bin/gpgconf",
];

/// How long a failed lookup is reused before the agent is probed again.
pub const MISS_RETRY_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
enum Lookup {
    Found(PathBuf),
    Missed(Instant),
}

/// Build the `GIT_SSH_COMMAND` value for a private key, rejecting any path
/// that could inject shell syntax.
pub fn ssh_command_for_key(path: &Path) -> Result<String, CredentialError> {
    let raw = path.to_str().ok_or(CredentialError::NonUtf8KeyPath)?;
    if raw.trim().is_empty() {
        return Err(CredentialError::EmptyKeyPath);
    }
    if let Some(character) = raw
        .chars()
        .find(|c| FORBIDDEN_KEY_CHARS.contains(c) || (!cfg!(windows) && *c == '\\'))
    {
        return Err(CredentialError::UnsafeKeyPath {
            path: raw.to_string(),
            character,
        });
    }
    Ok(format!("ssh -i \"{raw}\" -o IdentitiesOnly=yes"))
}

/// Locates an SSH agent socket when the ambient environment does not provide one.
///
/// A found socket is kept for the lifetime of the resolver. A miss is reused
/// for [`MISS_RETRY_INTERVAL`], after which the next call probes again and can
/// pick up an agent that started in the meantime.
pub struct CredentialResolver {
    executor: Arc<dyn CommandExecutor>,
    probe: bool,
    socket_candidates: Vec<PathBuf>,
    gpgconf_candidates: Vec<PathBuf>,
    retry_after: Duration,
    lookup: Mutex<Option<Lookup>>,
}

impl CredentialResolver {
    pub fn from_env(executor: Arc<dyn CommandExecutor>) -> Self {
        let ambient = std::env::var_os("SSH_AUTH_SOCK").is_some_and(|v| !v.is_empty());

        let mut socket_candidates = Vec::new();
        if let Some(runtime) = std::env::var_os("XDG_RUNTIME_DIR").map(PathBuf::from) {
            socket_candidates.push(runtime.join("ssh-agent.socket"));
            socket_candidates.push(runtime.join("gcr").join("ssh"));
        }
        if let Some(home) = dirs::home_dir() {
            socket_candidates.push(home.join(".ssh").join("agent.sock"));
        }

        Self {
            executor,
            probe: !ambient,
            socket_candidates,
            gpgconf_candidates: GPGCONF_CANDIDATES.iter().map(PathBuf::from).collect(),
            retry_after: MISS_RETRY_INTERVAL,
            lookup: Mutex::new(None),
        }
    }

    pub fn with_candidates(
        executor: Arc<dyn CommandExecutor>,
        socket_candidates: Vec<PathBuf>,
        gpgconf_candidates: Vec<PathBuf>,
    ) -> Self {
        Self {
            executor,
            probe: true,
            socket_candidates,
            gpgconf_candidates,
            retry_after: MISS_RETRY_INTERVAL,
            lookup: Mutex::new(None),
        }
    }

    pub fn with_retry_interval(mut self, retry_after: Duration) -> Self {
        self.retry_after = retry_after;
        self
    }

    /// A resolver that never probes and leaves `SSH_AUTH_SOCK` to the ambient environment.
    pub fn disabled() -> Self {
        Self {
            executor: Arc::new(crate::cli::SystemExecutor),
            probe: false,
            socket_candidates: Vec::new(),
            gpgconf_candidates: Vec::new(),
            retry_after: MISS_RETRY_INTERVAL,
            lookup: Mutex::new(None),
        }
    }

    /// Socket to export as `SSH_AUTH_SOCK`, if one had to be discovered.
    pub async fn agent_socket(&self) -> Option<PathBuf> {
        if !self.probe {
            return None;
        }
        // Held across discovery so concurrent git calls share one probe.
        let mut lookup = self.lookup.lock().await;
        match &*lookup {
            Some(Lookup::Found(path)) => return Some(path.clone()),
            Some(Lookup::Missed(at)) if at.elapsed() < self.retry_after => return None,
            _ => {}
        }
        let found = self.discover().await;
        *lookup = Some(match &found {
            Some(path) => Lookup::Found(path.clone()),
            None => Lookup::Missed(Instant::now()),
        });
        found
    }

    async fn discover(&self) -> Option<PathBuf> {
        if let Some(found) = self.socket_candidates.iter().find(|p| is_live_socket(p)) {
            tracing::debug!(socket = ?found, "Using conventional SSH agent socket");
            return Some(found.clone());
        }

        for gpgconf in &self.gpgconf_candidates {
            let Some(path) = self.query_gpg_socket(gpgconf).await else {
                continue;
            };
            if is_live_socket(&path) {
                tracing::debug!(socket = ?path, "Using gpg-agent SSH socket");
                return Some(path);
            }

            tracing::debug!(socket = ?path, "gpg-agent socket not live, launching agent");
            let launch = self
                .executor
                .run(
                    gpgconf.as_os_str(),
                    &[OsString::from("--launch"), OsString::from("gpg-agent")],
                    None,
                    &[],
                )
                .await;
            if !launch.success() {
                tracing::debug!(stderr = %launch.stderr.trim(), "gpg-agent launch failed");
            }
            if let Some(path) = self.query_gpg_socket(gpgconf).await
                && is_live_socket(&path)
            {
                return Some(path);
            }
            // The helper answered, so other candidates would report the same socket.
            return None;
        }

        tracing::debug!("No SSH agent socket found");
        None
    }

    async fn query_gpg_socket(&self, gpgconf: &Path) -> Option<PathBuf> {
        let out = self
            .executor
            .run(
                gpgconf.as_os_str(),
                &[
                    OsString::from("--list-dirs"),
                    OsString::from("agent-ssh-socket"),
                ],
                None,
                &[],
            )
            .await;
        let path = out.stdout.trim();
        (out.success() && !path.is_empty()).then(|| PathBuf::from(path))
    }
}

#[cfg(unix)]
fn is_live_socket(path: &Path) -> bool {
    use std::os::unix::fs::FileTypeExt;
    std::fs::metadata(path).is_ok_and(|m| m.file_type().is_socket())
}

#[cfg(not(unix))]
fn is_live_socket(_path: &Path) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_shell_metacharacters_before_building_command() {
        let err = ssh_command_for_key(Path::new("; rm -rf /")).unwrap_err();
        assert_eq!(
            err,
            CredentialError::UnsafeKeyPath {
                path: "; rm -rf /".into(),
                character: ';'
            }
        );
        for bad in ["$(whoami)", "key`id`", "a|b", "a\nb", "k\"ey", "k'ey"] {
            assert!(ssh_command_for_key(Path::new(bad)).is_err(), "{bad}");
        }
        assert_eq!(
            ssh_command_for_key(Path::new("  ")),
            Err(CredentialError::EmptyKeyPath)
        );
    }

    #[test]
    fn builds_identities_only_command() {
        let cmd = ssh_command_for_key(Path::new("/home/me/.ssh/id ed25519")).unwrap();
        assert_eq!(
            cmd,
            "ssh -i \"/home/me/.ssh/id ed25519\" -o IdentitiesOnly=yes"
        );
    }

    #[test]
    fn home_agent_socket_is_a_candidate() {
        let resolver = CredentialResolver::from_env(Arc::new(crate::cli::SystemExecutor));
        let home = dirs::home_dir().expect("home directory");
        assert!(
            resolver
                .socket_candidates
                .contains(&home.join(".ssh").join("agent.sock"))
        );
    }

    #[tokio::test]
    async fn disabled_resolver_never_reports_a_socket() {
        assert!(CredentialResolver::disabled().agent_socket().await.is_none());
    }

    #[cfg(unix)]
    mod probing {
        use std::{
            ffi::OsStr,
            os::unix::net::UnixListener,
            sync::Mutex,
        };

        use async_trait::async_trait;
        use tempfile::TempDir;

        use super::*;
        use crate::cli::CommandOutput;

        /// Pretends to be `gpgconf`; binds the agent socket when asked to
        /// launch unless the agent has no SSH support.
        struct FakeGpgconf {
            socket: PathBuf,
            ssh_support: bool,
            calls: Mutex<Vec<String>>,
            listener: Mutex<Option<UnixListener>>,
        }

        impl FakeGpgconf {
            fn new(socket: PathBuf) -> Self {
                Self {
                    socket,
                    ssh_support: true,
                    calls: Mutex::new(Vec::new()),
                    listener: Mutex::new(None),
                }
            }

            fn without_ssh_support(socket: PathBuf) -> Self {
                Self {
                    ssh_support: false,
                    ..Self::new(socket)
                }
            }

            fn calls(&self) -> Vec<String> {
                self.calls.lock().unwrap().clone()
            }
        }

        #[async_trait]
        impl CommandExecutor for FakeGpgconf {
            async fn run(
                &self,
                program: &OsStr,
                args: &[OsString],
                _cwd: Option<&Path>,
                _envs: &[(OsString, OsString)],
            ) -> CommandOutput {
                let joined = args
                    .iter()
                    .map(|a| a.to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join(" ");
                self.calls
                    .lock()
                    .unwrap()
                    .push(format!("{} {joined}", program.to_string_lossy()));
                if program != "gpgconf" {
                    return CommandOutput::spawn_failure("No such file or directory");
                }
                match joined.as_str() {
                    "--list-dirs agent-ssh-socket" => CommandOutput {
                        stdout: format!("{}\n", self.socket.display()),
                        ..Default::default()
                    },
                    "--launch gpg-agent" if !self.ssh_support => CommandOutput::default(),
                    "--launch gpg-agent" => {
                        let listener = UnixListener::bind(&self.socket).unwrap();
                        *self.listener.lock().unwrap() = Some(listener);
                        CommandOutput::default()
                    }
                    other => panic!("unexpected gpgconf call: {other}"),
                }
            }
        }

        #[tokio::test]
        async fn conventional_socket_is_used_without_spawning() {
            let td = TempDir::new().unwrap();
            let sock = td.path().join("ssh-agent.socket");
            let _listener = UnixListener::bind(&sock).unwrap();
            let fake = Arc::new(FakeGpgconf::new(td.path().join("unused")));

            let resolver = CredentialResolver::with_candidates(
                fake.clone(),
                vec![sock.clone()],
                vec![PathBuf::from("gpgconf")],
            );
            assert_eq!(resolver.agent_socket().await, Some(sock));
            assert!(fake.calls().is_empty());
        }

        #[tokio::test]
        async fn plain_file_is_not_a_socket_and_agent_is_launched_once() {
            let td = TempDir::new().unwrap();
            let not_a_socket = td.path().join("agent.sock");
            std::fs::write(&not_a_socket, "").unwrap();
            let gpg_sock = td.path().join("S.gpg-agent.ssh");
            let fake = Arc::new(FakeGpgconf::new(gpg_sock.clone()));

            let resolver = CredentialResolver::with_candidates(
                fake.clone(),
                vec![not_a_socket],
                vec![PathBuf::from("/missing/gpgconf"), PathBuf::from("gpgconf")],
            );
            assert_eq!(resolver.agent_socket().await, Some(gpg_sock.clone()));
            assert_eq!(
                fake.calls(),
                vec![
                    "/missing/gpgconf --list-dirs agent-ssh-socket",
                    "gpgconf --list-dirs agent-ssh-socket",
                    "gpgconf --launch gpg-agent",
                    "gpgconf --list-dirs agent-ssh-socket",
                ]
            );

            // Cached: no further probing.
            assert_eq!(resolver.agent_socket().await, Some(gpg_sock));
            assert_eq!(fake.calls().len(), 4);
        }

        #[tokio::test]
        async fn dead_agent_socket_is_not_probed_on_every_call() {
            let td = TempDir::new().unwrap();
            let fake = Arc::new(FakeGpgconf::without_ssh_support(
                td.path().join("S.gpg-agent.ssh"),
            ));
            let resolver = CredentialResolver::with_candidates(
                fake.clone(),
                Vec::new(),
                vec![PathBuf::from("gpgconf")],
            );

            for _ in 0..5 {
                assert_eq!(resolver.agent_socket().await, None);
            }
            assert_eq!(
                fake.calls(),
                vec![
                    "gpgconf --list-dirs agent-ssh-socket",
                    "gpgconf --launch gpg-agent",
                    "gpgconf --list-dirs agent-ssh-socket",
                ]
            );
        }

        #[tokio::test]
        async fn miss_is_retried_once_the_interval_has_passed() {
            let td = TempDir::new().unwrap();
            let sock = td.path().join("late.sock");
            let fake = Arc::new(FakeGpgconf::new(td.path().join("unused")));

            let cached =
                CredentialResolver::with_candidates(fake.clone(), vec![sock.clone()], Vec::new());
            assert_eq!(cached.agent_socket().await, None);

            let retrying =
                CredentialResolver::with_candidates(fake, vec![sock.clone()], Vec::new())
                    .with_retry_interval(Duration::ZERO);
            assert_eq!(retrying.agent_socket().await, None);

            let _listener = UnixListener::bind(&sock).unwrap();
            assert_eq!(cached.agent_socket().await, None);
            assert_eq!(retrying.agent_socket().await, Some(sock));
        }
    }
}
