// su runs inside sudo so that the target account gets a login session of its
// own; sudo alone cannot create one (its PAM stack lacks the session module).

use crate::config::Tools;
use crate::error::BrewboxError;
use crate::pipeline::{Pipeline, RunOptions, Step};
use std::path::Path;

pub const SUDOERS_DIR: &str = "/etc/sudoers.d";

pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value.chars().all(|c| {
            c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | ':' | '=' | '@' | '%' | '+' | ',')
        })
    {
        return value.to_string();
    }
    // foo'bar -> 'foo'\''bar'
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for ch in value.chars() {
        if ch == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(ch);
        }
    }
    out.push('\'');
    out
}

#[derive(Debug, Clone)]
pub struct Escalator {
    sudo: String,
    su: String,
}

impl Escalator {
    pub fn new(tools: &Tools) -> Self {
        Self {
            sudo: tools.sudo.clone(),
            su: tools.su.clone(),
        }
    }

    // `cd` may fail; the command then runs wherever the login shell started.
    pub fn command(&self, account: &str, workdir: &str, executable: &str, args: &[String]) -> Step {
        let mut snippet = format!("cd {} ; exec {}", shell_quote(workdir), shell_quote(executable));
        for arg in args {
            snippet.push(' ');
            snippet.push_str(&shell_quote(arg));
        }
        Step::new(
            self.sudo.clone(),
            [
                "-n".to_string(),
                self.su.clone(),
                "-".to_string(),
                account.to_string(),
                "-c".to_string(),
                snippet,
            ],
        )
    }

    // Host-side privileged step (account database, sudoers); confirmed like any other.
    pub fn root_command<I, S>(&self, program: &str, args: I) -> Step
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut full = vec![program.to_string()];
        full.extend(args.into_iter().map(Into::into));
        Step::new(self.sudo.clone(), full)
    }

    pub fn sudoers_line(&self, operator: &str, account: &str) -> String {
        format!(
            "{operator} ALL=(root) NOPASSWD: {} - {account} -c *",
            self.su
        )
    }

    pub fn preflight(&self, pipeline: &Pipeline<'_>, account: &str) -> Result<(), BrewboxError> {
        let step = Step::new(
            self.sudo.clone(),
            ["-n", "-l", self.su.as_str(), "-", account, "-c", "true"],
        );
        match pipeline.run(&[step], RunOptions::quiet()) {
            Ok(_) => Ok(()),
            Err(BrewboxError::StepFailed { stderr, status_code, .. }) => {
                Err(BrewboxError::EscalationDenied {
                    account: account.to_string(),
                    diagnostic: stderr
                        .unwrap_or_else(|| format!("sudo exited with status {status_code}")),
                    sudoers: sudoers_path(account),
                })
            }
            Err(err) => Err(err),
        }
    }
}

// sudo skips files in sudoers.d whose names contain a dot.
pub fn sudoers_path(account: &str) -> String {
    Path::new(SUDOERS_DIR)
        .join(account.replace('.', "_"))
        .to_string_lossy()
        .to_string()
}
