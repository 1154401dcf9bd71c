use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrewboxError {
    #[error("value of --name=... must not contain a slash (got {0:?})")]
    InvalidFlag(String),
    #[error("unknown template: {0:?} (currently, only template://default is available)")]
    UnknownTemplate(String),
    #[error("instance name {positional:?} and CLI flag --name={flag:?} cannot be specified together")]
    ConflictingNames { positional: String, flag: String },
    #[error("instance name must not start with {0:?}")]
    ReservedPrefix(String),
    #[error("invalid instance name {name:?}: {reason}")]
    InvalidIdentifier { name: String, reason: String },
    #[error("instance {0:?} does not exist (Hint: run `brewbox create {0}` first)")]
    InstanceNotFound(String),
    #[error("instance {instance:?} already exists (account {account:?} was created concurrently)")]
    AlreadyExists { instance: String, account: String },
    #[error("cannot run commands as {account:?}: {diagnostic} (Hint: check {sudoers})")]
    EscalationDenied {
        account: String,
        diagnostic: String,
        sudoers: String,
    },
    #[error("{}", render_step_failure(.step, .total, .command, .status_code, .stderr.as_deref()))]
    StepFailed {
        step: usize,
        total: usize,
        command: String,
        status_code: i32,
        stderr: Option<String>,
    },
    #[error("failed to run command `{command}`: {source}{}", .hint.as_deref().map(|h| format!(" (Hint: {h})")).unwrap_or_default())]
    Spawn {
        command: String,
        hint: Option<String>,
        #[source]
        source: io::Error,
    },
    #[error("interrupted by signal {signal} while running `{command}`")]
    Interrupted { command: String, signal: i32 },
    #[error("declined to run `{0}`")]
    UserDeclined(String),
    #[error("{message} (Hint: cd to a deeper directory, or run `brewbox shell` with `--plain`)")]
    UnsafeSyncRoot { path: String, message: String },
    #[error("account {account:?} carries the instance prefix but maps to an invalid instance name: {reason} (this is a bug, or the account was created outside brewbox)")]
    CorruptAccountName { account: String, reason: String },
    #[error("{source} (Hint: {hint})")]
    Hinted {
        hint: String,
        #[source]
        source: Box<BrewboxError>,
    },
    #[error("account error: {0}")]
    Account(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("prompt error: {0}")]
    Prompt(#[from] dialoguer::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

fn render_step_failure(
    step: &usize,
    total: &usize,
    command: &str,
    status_code: &i32,
    stderr: Option<&str>,
) -> String {
    let mut message = format!(
        "step {step}/{total} failed with status {status_code} while running `{command}`"
    );
    if let Some(stderr) = stderr {
        message = format!("{message}: {stderr}");
    }
    message
}

impl BrewboxError {
    pub fn exit_code(&self) -> i32 {
        match self {
            BrewboxError::StepFailed { status_code, .. } if *status_code != 0 => *status_code,
            BrewboxError::Interrupted { signal, .. } => 128 + signal,
            BrewboxError::Hinted { source, .. } => source.exit_code(),
            _ => 1,
        }
    }

    pub fn with_hint(self, hint: impl Into<String>) -> Self {
        BrewboxError::Hinted {
            hint: hint.into(),
            source: Box::new(self),
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            BrewboxError::InvalidFlag(_)
                | BrewboxError::UnknownTemplate(_)
                | BrewboxError::ConflictingNames { .. }
                | BrewboxError::ReservedPrefix(_)
                | BrewboxError::InvalidIdentifier { .. }
        )
    }
}
