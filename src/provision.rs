use crate::config::Accounts;
use crate::escalation::{shell_quote, sudoers_path, Escalator};
use crate::pipeline::Step;
use std::path::Path;

// Position (1-based) of the step that creates the account itself.
pub const ACCOUNT_CREATION_STEP: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountTool {
    Sysadminctl,
    Useradd,
}

impl AccountTool {
    pub fn native() -> Self {
        if cfg!(target_os = "macos") {
            AccountTool::Sysadminctl
        } else {
            AccountTool::Useradd
        }
    }
}

pub struct Provisioner<'a> {
    escalator: &'a Escalator,
    accounts: &'a Accounts,
    operator: &'a str,
    tool: AccountTool,
}

impl<'a> Provisioner<'a> {
    pub fn new(escalator: &'a Escalator, accounts: &'a Accounts, operator: &'a str) -> Self {
        Self {
            escalator,
            accounts,
            operator,
            tool: AccountTool::native(),
        }
    }

    #[cfg(test)]
    pub fn with_tool(mut self, tool: AccountTool) -> Self {
        self.tool = tool;
        self
    }

    pub fn home_for(&self, account: &str) -> String {
        Path::new(&self.accounts.home_root)
            .join(account)
            .to_string_lossy()
            .to_string()
    }

    pub fn create_steps(&self, instance: &str, account: &str) -> Vec<Step> {
        let home = self.home_for(account);
        let comment = format!("brewbox instance {instance}");
        let mut steps = match self.tool {
            AccountTool::Sysadminctl => vec![
                self.escalator.root_command(
                    "sysadminctl",
                    [
                        "-addUser",
                        account,
                        "-fullName",
                        comment.as_str(),
                        "-shell",
                        self.accounts.shell.as_str(),
                        "-home",
                        home.as_str(),
                    ],
                ),
                self.escalator
                    .root_command("createhomedir", ["-c", "-u", account]),
            ],
            AccountTool::Useradd => vec![self.escalator.root_command(
                "useradd",
                [
                    "--create-home",
                    "--home-dir",
                    home.as_str(),
                    "--shell",
                    self.accounts.shell.as_str(),
                    "--comment",
                    comment.as_str(),
                    "--user-group",
                    account,
                ],
            )],
        };
        steps.push(
            self.escalator
                .root_command("chmod", ["700", home.as_str()]),
        );
        steps.push(self.install_sudoers_step(account));
        steps
    }

    // The record is validated under a dotted name (ignored by sudo) before it goes live.
    fn install_sudoers_step(&self, account: &str) -> Step {
        let path = sudoers_path(account);
        let tmp = format!("{path}.tmp");
        let line = self.escalator.sudoers_line(self.operator, account);
        let script = format!(
            "umask 0337 && printf '%s\\n' {line} > {tmp} && visudo -cqf {tmp} && mv -f {tmp} {path} || {{ rm -f {tmp}; exit 1; }}",
            line = shell_quote(&line),
            tmp = shell_quote(&tmp),
            path = shell_quote(&path),
        );
        self.escalator.root_command("sh", ["-c", script.as_str()])
    }

    pub fn delete_steps(&self, account: &str) -> Vec<Step> {
        let path = sudoers_path(account);
        let remove_account = match self.tool {
            AccountTool::Sysadminctl => self
                .escalator
                .root_command("sysadminctl", ["-deleteUser", account]),
            AccountTool::Useradd => self
                .escalator
                .root_command("userdel", ["--remove", account]),
        };
        vec![
            self.escalator.root_command("rm", ["-f", path.as_str()]),
            remove_account,
        ]
    }
}
