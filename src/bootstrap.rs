use crate::config::Bootstrap;
use crate::error::BrewboxError;
use crate::escalation::Escalator;
use crate::pipeline::{Pipeline, RunOptions, Step};
use log::debug;
use std::path::Path;

const SHELLENV_SNIPPET: &str = r#"echo 'eval "$("${HOME}/DIR/bin/brew" shellenv)"' | tee -a "${HOME}/.bash_profile" >> "${HOME}/.zshenv""#;

pub struct Homebrew<'a> {
    escalator: &'a Escalator,
    settings: &'a Bootstrap,
}

impl<'a> Homebrew<'a> {
    pub fn new(escalator: &'a Escalator, settings: &'a Bootstrap) -> Self {
        Self {
            escalator,
            settings,
        }
    }

    pub fn version_step(&self, account: &str, home: &Path) -> Step {
        let brew = home.join(&self.settings.directory).join("bin").join("brew");
        self.escalator.command(
            account,
            "",
            &brew.to_string_lossy(),
            &["--version".to_string()],
        )
    }

    pub fn installed(
        &self,
        pipeline: &Pipeline<'_>,
        account: &str,
        home: &Path,
    ) -> Result<String, BrewboxError> {
        let outputs = pipeline.run(&[self.version_step(account, home)], RunOptions::quiet())?;
        let version = outputs
            .first()
            .map(|output| output.stdout_text().trim().to_string())
            .unwrap_or_default();
        debug!("Homebrew is installed for {account}: {version}");
        Ok(version)
    }

    pub fn install_steps(&self, account: &str) -> Vec<Step> {
        vec![
            self.escalator.command(
                account,
                "",
                "git",
                &[
                    "clone".to_string(),
                    self.settings.repository.clone(),
                    self.settings.directory.clone(),
                ],
            ),
            self.escalator.command(
                account,
                "",
                "sh",
                &[
                    "-c".to_string(),
                    SHELLENV_SNIPPET.replace("DIR", &self.settings.directory),
                ],
            ),
        ]
    }
}
