mod accounts;
mod bootstrap;
mod config;
mod error;
mod escalation;
mod mirror;
mod naming;
mod pipeline;
mod provision;
mod registry;
mod sync;

use accounts::{current_username, SystemAccounts};
use bootstrap::Homebrew;
use clap::{Parser, Subcommand};
use config::{read_config, resolve_config_path, validate_operator, Config, ConfigSource};
use error::BrewboxError;
use escalation::Escalator;
use log::{debug, error, info, warn, LevelFilter};
use mirror::Mirror;
use naming::{resolve_instance_name, validate_name, Naming};
use pipeline::{Cancellation, Pipeline, RunOptions, SystemRunner, TerminalPrompter};
use provision::{Provisioner, ACCOUNT_CREATION_STEP};
use registry::{Instance, Registry};
use std::env;
use std::fs;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use sync::{SyncEngine, SyncMode, SyncPlan};

const FALLBACK_SHELL: &str = "/bin/sh";
const LOG_ENV: &str = "BREWBOX_LOG";

#[derive(Parser, Debug)]
#[command(
    name = "brewbox",
    version,
    about = "brewbox: lightweight per-account sandbox for Homebrew",
    after_help = "Examples:\n  brewbox create default\n  cd ~/src/project && brewbox shell default brew install xz\n  brewbox delete default"
)]
struct Cli {
    #[arg(long, global = true, help = "debug mode [$DEBUG]")]
    debug: bool,
    #[arg(
        long,
        global = true,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        help = "enable interactive confirmations (defaults to true when stdout is a terminal)"
    )]
    tty: Option<bool>,
    #[arg(long, global = true, help = "plain mode (no Homebrew bootstrap, no file syncing)")]
    plain: bool,
    #[arg(long, global = true, help = "config file [$BREWBOX_CONFIG]")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "Create an instance")]
    Create {
        instance: Option<String>,
        #[arg(long, help = "override the instance name")]
        name: Option<String>,
    },
    #[command(about = "Delete an instance", visible_aliases = ["remove", "rm"])]
    Delete { instance: String },
    #[command(about = "List instances", visible_alias = "ls")]
    List {
        #[arg(long, conflicts_with = "quiet", help = "one JSON object per line")]
        json: bool,
        #[arg(long, short, help = "only show names")]
        quiet: bool,
    },
    #[command(about = "Run a command in an instance")]
    Shell {
        #[arg(long, help = "working directory inside the instance")]
        workdir: Option<String>,
        #[arg(long, help = "do not sync modified files back to the host")]
        read_only: bool,
        instance: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        argv: Vec<String>,
    },
}

#[derive(Debug, Clone)]
struct Context {
    config: Config,
    config_source: ConfigSource,
    operator: String,
    tty: bool,
    plain: bool,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.debug || env_flag("DEBUG"));
    if let Err(err) = run(cli) {
        error!("{}", failure_message(&err));
        std::process::exit(err.exit_code());
    }
}

// Validation errors happen before any side effect, so they read as plain usage errors.
fn failure_message(err: &BrewboxError) -> String {
    if err.is_validation() {
        err.to_string()
    } else {
        format!("exiting with an error: {err}")
    }
}

fn env_flag(key: &str) -> bool {
    env::var(key)
        .map(|value| matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

fn init_logging(debug: bool) {
    let level = if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_env(env_logger::Env::new().filter(LOG_ENV))
        .format_target(false)
        .format_timestamp_secs()
        .target(env_logger::Target::Stderr)
        .init();
}

fn build_context(cli: &Cli) -> Result<Context, BrewboxError> {
    let config_source = resolve_config_path(cli.config.as_ref());
    let config = read_config(&config_source)?;
    let operator = match &config.operator {
        Some(operator) => operator.clone(),
        None => current_username()?,
    };
    validate_operator(&operator)?;
    debug!(
        "Using config {} (operator {operator})",
        config_source.path.display()
    );
    Ok(Context {
        config,
        config_source,
        operator,
        tty: cli.tty.unwrap_or_else(|| io::stdout().is_terminal()),
        plain: cli.plain,
    })
}

fn run(cli: Cli) -> Result<(), BrewboxError> {
    let ctx = build_context(&cli)?;
    let runner = SystemRunner::new(Cancellation::install()?);
    let prompter = TerminalPrompter;
    let accounts = SystemAccounts;
    let pipeline = Pipeline::new(&runner, &prompter, ctx.tty && io::stdin().is_terminal());
    let registry = Registry::new(Naming::new(ctx.operator.clone()), &accounts);

    match cli.command {
        Commands::Create { instance, name } => handle_create(
            &ctx,
            &registry,
            &pipeline,
            instance.as_deref().unwrap_or(""),
            name.as_deref().unwrap_or(""),
        ),
        Commands::Delete { instance } => handle_delete(&ctx, &registry, &pipeline, &instance),
        Commands::List { json, quiet } => {
            let stdout = io::stdout();
            let mut out = stdout.lock();
            handle_list(&registry, json, quiet, &mut out)
        }
        Commands::Shell {
            workdir,
            read_only,
            instance,
            argv,
        } => {
            let host_dir = env::current_dir()?;
            let mirror = if ctx.plain {
                None
            } else {
                Some(Mirror::resolve(
                    &ctx.config.tools.rsync,
                    forwarded_config(&ctx.config_source),
                )?)
            };
            handle_shell(
                &ctx,
                &registry,
                &pipeline,
                mirror.as_ref(),
                ShellRequest {
                    instance,
                    argv,
                    workdir,
                    read_only,
                    host_dir,
                    host_home: dirs::home_dir(),
                },
            )
        }
    }
}

fn forwarded_config(source: &ConfigSource) -> Option<PathBuf> {
    if !source.explicit {
        return None;
    }
    Some(fs::canonicalize(&source.path).unwrap_or_else(|_| source.path.clone()))
}

fn handle_create(
    ctx: &Context,
    registry: &Registry<'_>,
    pipeline: &Pipeline<'_>,
    positional: &str,
    flag_name: &str,
) -> Result<(), BrewboxError> {
    let instance = resolve_instance_name(positional, flag_name)?;
    validate_name(&instance)?;
    let account = registry.naming().account_for(&instance);
    let escalator = Escalator::new(&ctx.config.tools);

    if registry.exists(&instance)? {
        info!("Already exists: instance={instance} account={account}");
    } else {
        info!("Creating an instance: instance={instance} account={account}");
        let provisioner = Provisioner::new(&escalator, &ctx.config.accounts, &ctx.operator);
        let steps = provisioner.create_steps(&instance, &account);
        if let Err(err) = pipeline.run(&steps, RunOptions::attached(true)) {
            let lost_race = matches!(
                err,
                BrewboxError::StepFailed {
                    step: ACCOUNT_CREATION_STEP,
                    ..
                }
            ) && registry.exists(&instance)?;
            if lost_race {
                debug!("account creation failed but the account exists now: {err}");
                return Err(BrewboxError::AlreadyExists { instance, account });
            }
            return Err(err);
        }
    }

    if ctx.plain {
        return Ok(());
    }
    let home = registry
        .lookup(&instance)?
        .map(|found| found.home)
        .filter(|home| !home.as_os_str().is_empty())
        .ok_or_else(|| {
            BrewboxError::Account(format!(
                "failed to detect the home directory of the user {account:?}"
            ))
        })?;
    let brew = Homebrew::new(&escalator, &ctx.config.bootstrap);
    match brew.installed(pipeline, &account, &home) {
        Ok(version) => {
            info!("Homebrew is already installed: instance={instance} version={version:?}");
        }
        Err(err) => {
            debug!("Homebrew is not installed for {account}: {err}");
            info!(
                "Installing Homebrew (If you are seeing an error, do NOT report it to the upstream Homebrew): instance={instance}"
            );
            pipeline.run(&brew.install_steps(&account), RunOptions::attached(true))?;
            brew.installed(pipeline, &account, &home)
                .map_err(|err| err.with_hint("failed to detect Homebrew after installing it"))?;
        }
    }
    Ok(())
}

fn handle_delete(
    ctx: &Context,
    registry: &Registry<'_>,
    pipeline: &Pipeline<'_>,
    instance: &str,
) -> Result<(), BrewboxError> {
    validate_name(instance)?;
    let account = registry.naming().account_for(instance);
    if !registry.exists(instance)? {
        warn!("No such instance: instance={instance} account={account}");
        return Ok(());
    }
    let escalator = Escalator::new(&ctx.config.tools);
    let provisioner = Provisioner::new(&escalator, &ctx.config.accounts, &ctx.operator);
    info!("Deleting an instance: instance={instance} account={account}");
    pipeline.run(&provisioner.delete_steps(&account), RunOptions::attached(true))?;
    Ok(())
}

fn handle_list<W: Write>(
    registry: &Registry<'_>,
    json: bool,
    quiet: bool,
    out: &mut W,
) -> Result<(), BrewboxError> {
    let instances = registry.list()?;
    if json {
        for instance in &instances {
            writeln!(out, "{}", serde_json::to_string(instance)?)?;
        }
    } else if quiet {
        for instance in &instances {
            writeln!(out, "{}", instance.name)?;
        }
    } else {
        write_table(&instances, out)?;
    }
    Ok(())
}

fn write_table<W: Write>(instances: &[Instance], out: &mut W) -> Result<(), BrewboxError> {
    let width = instances
        .iter()
        .map(|instance| instance.name.len())
        .max()
        .unwrap_or(0)
        .max("NAME".len());
    writeln!(out, "{:<width$}    USER", "NAME")?;
    for instance in instances {
        writeln!(out, "{:<width$}    {}", instance.name, instance.user)?;
    }
    Ok(())
}

#[derive(Debug, Clone)]
struct ShellRequest {
    instance: String,
    argv: Vec<String>,
    workdir: Option<String>,
    read_only: bool,
    host_dir: PathBuf,
    host_home: Option<PathBuf>,
}

fn guest_dir_for(guest_home: &Path, host_dir: &Path) -> PathBuf {
    guest_home.join(host_dir.strip_prefix("/").unwrap_or(host_dir))
}

fn handle_shell(
    ctx: &Context,
    registry: &Registry<'_>,
    pipeline: &Pipeline<'_>,
    mirror: Option<&Mirror>,
    request: ShellRequest,
) -> Result<(), BrewboxError> {
    let instance = request.instance.as_str();
    validate_name(instance)?;
    let Some(account) = registry.lookup(instance)? else {
        debug!(
            "account {} does not exist",
            registry.naming().account_for(instance)
        );
        return Err(BrewboxError::InstanceNotFound(instance.to_string()));
    };
    if account.home.as_os_str().is_empty() {
        return Err(BrewboxError::Account(format!(
            "failed to detect the home directory of the user {:?}",
            account.name
        )));
    }

    let (executable, args) = match request.argv.split_first() {
        Some((executable, args)) => (executable.clone(), args.to_vec()),
        None if account.shell.trim().is_empty() => {
            warn!(
                "no shell was found for {}, falling back to {FALLBACK_SHELL}",
                account.name
            );
            (FALLBACK_SHELL.to_string(), Vec::new())
        }
        None => (account.shell.clone(), Vec::new()),
    };

    let guest_dir = match &request.workdir {
        Some(workdir) if !workdir.is_empty() => PathBuf::from(workdir),
        _ => guest_dir_for(&account.home, &request.host_dir),
    };
    let host_home = match (&request.host_home, ctx.plain) {
        (Some(home), _) => home.clone(),
        (None, true) => PathBuf::new(),
        (None, false) => {
            return Err(BrewboxError::Config(
                "unable to resolve $HOME of the invoking user".to_string(),
            ))
        }
    };

    let escalator = Escalator::new(&ctx.config.tools);
    debug!("Entering {} (uid {}) at {}", account.name, account.uid, guest_dir.display());
    escalator.preflight(pipeline, &account.name)?;

    let exec = vec![escalator.command(
        &account.name,
        &guest_dir.to_string_lossy(),
        &executable,
        &args,
    )];
    let plan = SyncPlan {
        instance,
        account: &account.name,
        host_dir: &request.host_dir,
        guest_dir: &guest_dir,
        host_home: &host_home,
        mode: SyncMode {
            plain: ctx.plain,
            read_only: request.read_only,
            interactive: pipeline.interactive(),
        },
    };
    SyncEngine::new(pipeline, &escalator, mirror).run(&plan, &exec)
}
