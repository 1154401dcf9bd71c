//! Bidirectional mirroring around a command run inside an instance.
//!
//! The mirror always propagates deletions, so the host side is guarded: the
//! synced directory may be neither the host home nor anything shallower than
//! `/Users/<name>/<dir>`.

use crate::error::BrewboxError;
use crate::escalation::Escalator;
use crate::mirror::{endpoints, Direction, Mirror};
use crate::pipeline::{Pipeline, RunOptions, Step};
use log::{error, info};
use std::path::Path;

// "/Users/alice" splits into ["", "Users", "alice"].
pub const MIN_SYNC_ROOT_DEPTH: usize = 4;

pub fn path_depth(path: &Path) -> usize {
    let text = path.to_string_lossy();
    let trimmed = text.trim_end_matches('/');
    trimmed.split('/').count()
}

pub fn check_sync_root(host_dir: &Path, host_home: &Path) -> Result<(), BrewboxError> {
    let normalized = host_dir.to_string_lossy().trim_end_matches('/').to_string();
    let home = host_home.to_string_lossy().trim_end_matches('/').to_string();
    if normalized == home {
        return Err(BrewboxError::UnsafeSyncRoot {
            path: host_dir.display().to_string(),
            message: format!(
                "the host working directory ({:?}) must not be $HOME, as this directory is being rsynced to the instance",
                host_dir.display().to_string()
            ),
        });
    }
    let depth = path_depth(host_dir);
    if depth < MIN_SYNC_ROOT_DEPTH {
        return Err(BrewboxError::UnsafeSyncRoot {
            path: host_dir.display().to_string(),
            message: format!(
                "expected the depth of the host working directory ({:?}) to be at least {MIN_SYNC_ROOT_DEPTH}, only got {depth}",
                host_dir.display().to_string()
            ),
        });
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncMode {
    pub plain: bool,
    pub read_only: bool,
    pub interactive: bool,
}

#[derive(Debug, Clone)]
pub struct SyncPlan<'a> {
    pub instance: &'a str,
    pub account: &'a str,
    pub host_dir: &'a Path,
    pub guest_dir: &'a Path,
    pub host_home: &'a Path,
    pub mode: SyncMode,
}

pub struct SyncEngine<'a> {
    pipeline: &'a Pipeline<'a>,
    escalator: &'a Escalator,
    mirror: Option<&'a Mirror>,
}

impl<'a> SyncEngine<'a> {
    pub fn new(pipeline: &'a Pipeline<'a>, escalator: &'a Escalator, mirror: Option<&'a Mirror>) -> Self {
        Self {
            pipeline,
            escalator,
            mirror,
        }
    }

    pub fn run(&self, plan: &SyncPlan<'_>, exec: &[Step]) -> Result<(), BrewboxError> {
        let mirror = if plan.mode.plain {
            None
        } else {
            Some(self.mirror.ok_or_else(|| {
                BrewboxError::Config("file syncing requires rsync to be configured".to_string())
            })?)
        };

        if let Some(mirror) = mirror {
            check_sync_root(plan.host_dir, plan.host_home)?;
            self.pre_sync(mirror, plan)
                .map_err(|err| err.with_hint("run with `brewbox shell --plain` as a workaround"))?;
        }

        let exec_result = self
            .pipeline
            .run(exec, RunOptions::attached(false))
            .map(|_| ());
        if let Err(err) = &exec_result {
            error!("{err}");
        }

        if let Some(mirror) = mirror {
            if !plan.mode.read_only {
                if let Err(sync_err) = self.post_sync(mirror, plan) {
                    if exec_result.is_ok() {
                        return Err(sync_err);
                    }
                    error!("failed to sync the files back: {sync_err}");
                }
            }
        }
        exec_result
    }

    fn pre_sync(&self, mirror: &Mirror, plan: &SyncPlan<'_>) -> Result<(), BrewboxError> {
        let (src, dst) = endpoints(plan.instance, Direction::HostToGuest, plan.host_dir, plan.guest_dir);
        info!("➡️ Syncing the files: {src} -> {dst}");
        let steps = vec![
            self.escalator.command(
                plan.account,
                "",
                "mkdir",
                &[
                    "-p".to_string(),
                    "-m".to_string(),
                    "700".to_string(),
                    plan.guest_dir.to_string_lossy().to_string(),
                ],
            ),
            mirror.step(
                plan.instance,
                Direction::HostToGuest,
                plan.host_dir,
                plan.guest_dir,
                false,
            ),
        ];
        self.pipeline.run(&steps, RunOptions::no_stdin())?;
        Ok(())
    }

    fn post_sync(&self, mirror: &Mirror, plan: &SyncPlan<'_>) -> Result<(), BrewboxError> {
        let (src, dst) = endpoints(plan.instance, Direction::GuestToHost, plan.host_dir, plan.guest_dir);
        if plan.mode.interactive {
            info!("⬅️ Syncing the files back (dry run): {src} -> {dst}");
            let probe = mirror.step(
                plan.instance,
                Direction::GuestToHost,
                plan.host_dir,
                plan.guest_dir,
                true,
            );
            let outputs = self
                .pipeline
                .run(&[probe], RunOptions::no_stdin().tee_stdout())?;
            let nothing_to_do = outputs
                .iter()
                .all(|output| output.stdout_text().trim().is_empty());
            if nothing_to_do {
                info!("⬅️ Nothing to sync back: {src} -> {dst}");
                return Ok(());
            }
        }
        info!("⬅️ Syncing the files back: {src} -> {dst}");
        let step = mirror.step(
            plan.instance,
            Direction::GuestToHost,
            plan.host_dir,
            plan.guest_dir,
            false,
        );
        self.pipeline.run(&[step], RunOptions::attached(true))?;
        Ok(())
    }
}
