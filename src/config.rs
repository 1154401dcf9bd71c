use crate::error::BrewboxError;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_ENV: &str = "BREWBOX_CONFIG";

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub version: u32,
    pub operator: Option<String>,
    pub tools: Tools,
    pub accounts: Accounts,
    pub bootstrap: Bootstrap,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct Tools {
    pub sudo: String,
    pub su: String,
    pub rsync: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct Accounts {
    pub home_root: String,
    pub shell: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct Bootstrap {
    pub repository: String,
    pub directory: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: 1,
            operator: None,
            tools: Tools::default(),
            accounts: Accounts::default(),
            bootstrap: Bootstrap::default(),
        }
    }
}

impl Default for Tools {
    fn default() -> Self {
        Self {
            sudo: "sudo".to_string(),
            su: "/usr/bin/su".to_string(),
            rsync: "rsync".to_string(),
        }
    }
}

impl Default for Accounts {
    fn default() -> Self {
        if cfg!(target_os = "macos") {
            Self {
                home_root: "/Users".to_string(),
                shell: "/bin/zsh".to_string(),
            }
        } else {
            Self {
                home_root: "/home".to_string(),
                shell: "/bin/bash".to_string(),
            }
        }
    }
}

impl Default for Bootstrap {
    fn default() -> Self {
        Self {
            repository: "https://github.com/Homebrew/brew".to_string(),
            directory: "homebrew".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigSource {
    pub path: PathBuf,
    pub explicit: bool,
}

pub fn resolve_config_path(override_path: Option<&PathBuf>) -> ConfigSource {
    if let Some(path) = override_path {
        return ConfigSource {
            path: path.clone(),
            explicit: true,
        };
    }
    if let Ok(path) = env::var(CONFIG_ENV) {
        if !path.trim().is_empty() {
            return ConfigSource {
                path: PathBuf::from(path),
                explicit: true,
            };
        }
    }
    let mut base = default_config_dir();
    base.push("config.yaml");
    ConfigSource {
        path: base,
        explicit: false,
    }
}

fn default_config_dir() -> PathBuf {
    if let Some(dir) = dirs::config_dir() {
        return dir.join("brewbox");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".config").join("brewbox");
    }
    PathBuf::from(".brewbox")
}

pub fn read_config(source: &ConfigSource) -> Result<Config, BrewboxError> {
    if !source.path.exists() {
        if source.explicit {
            return Err(BrewboxError::Config(format!(
                "config file not found: {}",
                source.path.display()
            )));
        }
        return Ok(Config::default());
    }
    let content = fs::read_to_string(&source.path)?;
    read_config_from_str(&content)
        .map_err(|err| BrewboxError::Config(format!("{}: {err}", source.path.display())))
}

pub fn read_config_from_str(content: &str) -> Result<Config, BrewboxError> {
    let cfg: Config = if content.trim().is_empty() {
        Config::default()
    } else {
        serde_yaml::from_str(content)?
    };
    validate_config(&cfg)?;
    Ok(cfg)
}

pub fn validate_config(cfg: &Config) -> Result<(), BrewboxError> {
    if cfg.version != 1 {
        return Err(BrewboxError::Config(format!(
            "unsupported config version {} (expected 1)",
            cfg.version
        )));
    }
    if let Some(operator) = &cfg.operator {
        validate_operator(operator)?;
    }
    if !Path::new(&cfg.tools.su).is_absolute() {
        return Err(BrewboxError::Config(format!(
            "tools.su must be an absolute path (it is matched literally by sudoers), got {:?}",
            cfg.tools.su
        )));
    }
    for (field, value) in [
        ("tools.sudo", &cfg.tools.sudo),
        ("tools.rsync", &cfg.tools.rsync),
        ("accounts.shell", &cfg.accounts.shell),
        ("bootstrap.repository", &cfg.bootstrap.repository),
        ("bootstrap.directory", &cfg.bootstrap.directory),
    ] {
        if value.trim().is_empty() {
            return Err(BrewboxError::Config(format!("{field} must not be empty")));
        }
    }
    if !Path::new(&cfg.accounts.home_root).is_absolute() {
        return Err(BrewboxError::Config(format!(
            "accounts.home_root must be an absolute path, got {:?}",
            cfg.accounts.home_root
        )));
    }
    if Path::new(&cfg.bootstrap.directory).is_absolute() || cfg.bootstrap.directory.contains("..") {
        return Err(BrewboxError::Config(format!(
            "bootstrap.directory must be relative to the instance home, got {:?}",
            cfg.bootstrap.directory
        )));
    }
    // spliced into the shell-init line appended to the instance's profiles
    if !cfg
        .bootstrap
        .directory
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '/'))
    {
        return Err(BrewboxError::Config(format!(
            "bootstrap.directory may only contain ASCII letters, digits, '.', '_', '-' and '/', got {:?}",
            cfg.bootstrap.directory
        )));
    }
    Ok(())
}

pub fn validate_operator(operator: &str) -> Result<(), BrewboxError> {
    if operator.is_empty()
        || !operator
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(BrewboxError::Config(format!(
            "operator {operator:?} must be a non-empty account name made of ASCII letters, digits, '.', '_' or '-'"
        )));
    }
    Ok(())
}
