//! Scripted executor for unit tests that must not spawn `git`.
use std::{
    collections::HashMap,
    ffi::{OsStr, OsString},
    path::Path,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;

use crate::{
    CredentialResolver, GitService,
    cli::{CommandExecutor, CommandOutput, GitCli},
};

/// Answers by the space-joined argument list; unknown commands fail.
#[derive(Default)]
pub struct ScriptedExecutor {
    responses: Mutex<HashMap<String, CommandOutput>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn respond(&self, args: &str, exit_code: i32, stdout: &str, stderr: &str) {
        self.responses.lock().unwrap().insert(
            args.to_string(),
            CommandOutput {
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
                exit_code,
            },
        );
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandExecutor for ScriptedExecutor {
    async fn run(
        &self,
        _program: &OsStr,
        args: &[OsString],
        _cwd: Option<&Path>,
        _envs: &[(OsString, OsString)],
    ) -> CommandOutput {
        let key = args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ");
        self.calls.lock().unwrap().push(key.clone());
        self.responses
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .unwrap_or_else(|| CommandOutput {
                stderr: format!("unscripted: git {key}"),
                exit_code: 128,
                ..Default::default()
            })
    }
}

pub fn scripted_service() -> (GitService, Arc<ScriptedExecutor>) {
    let executor = Arc::new(ScriptedExecutor::default());
    let cli = GitCli::with_executor(executor.clone()).with_credentials(CredentialResolver::disabled());
    (GitService::cli_only(cli), executor)
}
