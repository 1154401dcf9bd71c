use crate::error::BrewboxError;
use crate::escalation::shell_quote;
use crate::pipeline::Step;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    HostToGuest,
    GuestToHost,
}

#[derive(Debug, Clone)]
pub struct Mirror {
    program: String,
    self_exe: PathBuf,
    config_override: Option<PathBuf>,
}

impl Mirror {
    pub fn new(program: String, self_exe: PathBuf, config_override: Option<PathBuf>) -> Self {
        Self {
            program,
            self_exe,
            config_override,
        }
    }

    pub fn resolve(
        program: &str,
        config_override: Option<PathBuf>,
    ) -> Result<Self, BrewboxError> {
        let resolved = which::which(program).map_err(|err| BrewboxError::Spawn {
            command: program.to_string(),
            hint: Some(format!(
                "install rsync, or point `tools.rsync` in the config at it ({err})"
            )),
            source: io::Error::new(io::ErrorKind::NotFound, err.to_string()),
        })?;
        let self_exe = std::env::current_exe()?;
        Ok(Self::new(
            resolved.to_string_lossy().to_string(),
            self_exe,
            config_override,
        ))
    }

    // rsync invokes this as `<hook> <instance> rsync --server ...`.
    pub fn remote_shell(&self) -> String {
        let mut hook = format!(
            "{} shell --workdir=/ --plain",
            shell_quote(&self.self_exe.to_string_lossy())
        );
        if let Some(path) = &self.config_override {
            hook.push_str(&format!(
                " --config={}",
                shell_quote(&path.to_string_lossy())
            ));
        }
        hook
    }

    pub fn step(
        &self,
        instance: &str,
        direction: Direction,
        host_dir: &Path,
        guest_dir: &Path,
        dry_run: bool,
    ) -> Step {
        let (src, dst) = endpoints(instance, direction, host_dir, guest_dir);
        let mut args = Vec::new();
        if dry_run {
            args.push("--dry-run".to_string());
        }
        args.extend([
            "-rai".to_string(),
            "--delete".to_string(),
            "-e".to_string(),
            self.remote_shell(),
            src,
            dst,
        ]);
        Step::new(self.program.clone(), args)
    }
}

pub fn endpoints(
    instance: &str,
    direction: Direction,
    host_dir: &Path,
    guest_dir: &Path,
) -> (String, String) {
    let host = host_dir.to_string_lossy().trim_end_matches('/').to_string();
    let guest = guest_dir.to_string_lossy().trim_end_matches('/').to_string();
    match direction {
        Direction::HostToGuest => (format!("{host}/"), format!("{instance}:{guest}")),
        Direction::GuestToHost => (format!("{instance}:{guest}/"), host),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mirror() -> Mirror {
        Mirror::new(
            "/usr/bin/rsync".to_string(),
            PathBuf::from("/usr/local/bin/brewbox"),
            None,
        )
    }

    #[test]
    fn host_to_guest_step() {
        let step = mirror().step(
            "default",
            Direction::HostToGuest,
            Path::new("/Users/alice/src/proj"),
            Path::new("/Users/brewbox_alice_default/Users/alice/src/proj"),
            false,
        );
        assert_eq!(
            step.render(),
            "/usr/bin/rsync -rai --delete -e '/usr/local/bin/brewbox shell --workdir=/ --plain' /Users/alice/src/proj/ default:/Users/brewbox_alice_default/Users/alice/src/proj"
        );
    }

    #[test]
    fn guest_to_host_dry_run_step() {
        let step = mirror().step(
            "default",
            Direction::GuestToHost,
            Path::new("/Users/alice/src/proj/"),
            Path::new("/Users/brewbox_alice_default/Users/alice/src/proj"),
            true,
        );
        assert_eq!(step.args[0], "--dry-run");
        assert!(step.args.contains(&"--delete".to_string()));
        let n = step.args.len();
        assert_eq!(
            step.args[n - 2],
            "default:/Users/brewbox_alice_default/Users/alice/src/proj/"
        );
        assert_eq!(step.args[n - 1], "/Users/alice/src/proj");
    }

    #[test]
    fn remote_shell_forwards_config_override() {
        let mirror = Mirror::new(
            "rsync".to_string(),
            PathBuf::from("/opt/my tools/brewbox"),
            Some(PathBuf::from("/etc/brewbox.yaml")),
        );
        assert_eq!(
            mirror.remote_shell(),
            "'/opt/my tools/brewbox' shell --workdir=/ --plain --config=/etc/brewbox.yaml"
        );
    }
}
