use crate::error::BrewboxError;
use crate::escalation::shell_quote;
use dialoguer::console::style;
use dialoguer::theme::ColorfulTheme;
use dialoguer::Confirm;
use log::debug;
use signal_hook::consts::signal::{SIGINT, SIGTERM};
use signal_hook::flag;
use std::io::{self, Read, Write};
use std::os::unix::process::ExitStatusExt;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub program: String,
    pub args: Vec<String>,
}

impl Step {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn render(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(shell_quote(&self.program));
        parts.extend(self.args.iter().map(|arg| shell_quote(arg)));
        parts.join(" ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdinMode {
    Inherit,
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Inherit,
    // stdout is streamed to our stdout and kept; stderr is inherited
    Tee,
    Capture,
}

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status_code == 0
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }
}

pub trait ProcessRunner {
    fn run(&self, step: &Step, stdin: StdinMode, output: OutputMode)
        -> Result<CommandOutput, io::Error>;
}

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const TERMINATION_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
#[error("interrupted by signal {signal}")]
pub struct Cancelled {
    pub signal: i32,
}

fn cancelled(signal: i32) -> io::Error {
    io::Error::new(io::ErrorKind::Interrupted, Cancelled { signal })
}

// Holds the first SIGINT/SIGTERM delivered to brewbox itself, if any.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    signal: Arc<AtomicUsize>,
}

impl Cancellation {
    pub fn install() -> Result<Self, io::Error> {
        let cancel = Self::default();
        for signal in [SIGINT, SIGTERM] {
            flag::register_usize(signal, Arc::clone(&cancel.signal), signal as usize)?;
        }
        Ok(cancel)
    }

    pub fn requested(&self) -> Option<i32> {
        match self.signal.load(Ordering::SeqCst) {
            0 => None,
            signal => Some(signal as i32),
        }
    }

    #[cfg(test)]
    pub fn request(&self, signal: i32) {
        self.signal.store(signal as usize, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Default)]
pub struct SystemRunner {
    cancel: Cancellation,
}

impl SystemRunner {
    pub fn new(cancel: Cancellation) -> Self {
        Self { cancel }
    }

    fn execute<W>(&self, mut cmd: Command, output: OutputMode, tee: W) -> Result<CommandOutput, io::Error>
    where
        W: Write + Send + 'static,
    {
        if output != OutputMode::Inherit {
            cmd.stdout(Stdio::piped());
        }
        if output == OutputMode::Capture {
            cmd.stderr(Stdio::piped());
        }
        let mut child = cmd.spawn()?;
        let relay_failed = Arc::new(AtomicBool::new(false));
        let stdout_pump = child.stdout.take().map(|pipe| {
            let sink = (output == OutputMode::Tee).then_some(tee);
            spawn_pump(pipe, sink, Arc::clone(&relay_failed))
        });
        let stderr_pump = child
            .stderr
            .take()
            .map(|pipe| spawn_pump(pipe, None::<io::Sink>, Arc::clone(&relay_failed)));

        let status = self.supervise(&mut child, &relay_failed);
        let stdout = join_pump(stdout_pump)?;
        let stderr = join_pump(stderr_pump)?;
        Ok(CommandOutput {
            status_code: exit_code(status?),
            stdout,
            stderr,
        })
    }

    fn supervise(&self, child: &mut Child, relay_failed: &AtomicBool) -> Result<ExitStatus, io::Error> {
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }
            if let Some(signal) = self.cancel.requested() {
                debug!("Forwarding signal {signal} to pid {}", child.id());
                terminate(child, signal)?;
                return Err(cancelled(signal));
            }
            if relay_failed.load(Ordering::SeqCst) {
                let _ = child.kill();
                child.wait()?;
                return Err(io::Error::new(
                    io::ErrorKind::Other,
                    "failed to relay the output of the command",
                ));
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

impl ProcessRunner for SystemRunner {
    fn run(
        &self,
        step: &Step,
        stdin: StdinMode,
        output: OutputMode,
    ) -> Result<CommandOutput, io::Error> {
        if let Some(signal) = self.cancel.requested() {
            return Err(cancelled(signal));
        }
        let mut cmd = Command::new(&step.program);
        cmd.args(&step.args);
        if stdin == StdinMode::Null {
            cmd.stdin(Stdio::null());
        }
        self.execute(cmd, output, io::stdout())
    }
}

fn terminate(child: &mut Child, signal: i32) -> Result<(), io::Error> {
    // SAFETY: kill has no memory preconditions; the pid belongs to an unreaped child
    unsafe {
        libc::kill(child.id() as libc::pid_t, signal);
    }
    let deadline = Instant::now() + TERMINATION_GRACE;
    while Instant::now() < deadline {
        if child.try_wait()?.is_some() {
            return Ok(());
        }
        thread::sleep(POLL_INTERVAL);
    }
    let _ = child.kill();
    child.wait()?;
    Ok(())
}

type Pump = thread::JoinHandle<Result<Vec<u8>, io::Error>>;

fn spawn_pump<R, W>(mut source: R, mut sink: Option<W>, relay_failed: Arc<AtomicBool>) -> Pump
where
    R: Read + Send + 'static,
    W: Write + Send + 'static,
{
    thread::spawn(move || {
        let mut captured = Vec::new();
        let mut buf = [0u8; 8192];
        loop {
            let n = match source.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    relay_failed.store(true, Ordering::SeqCst);
                    return Err(err);
                }
            };
            captured.extend_from_slice(&buf[..n]);
            if let Some(sink) = sink.as_mut() {
                if let Err(err) = sink.write_all(&buf[..n]).and_then(|()| sink.flush()) {
                    relay_failed.store(true, Ordering::SeqCst);
                    return Err(err);
                }
            }
        }
        Ok(captured)
    })
}

fn join_pump(pump: Option<Pump>) -> Result<Vec<u8>, io::Error> {
    match pump {
        None => Ok(Vec::new()),
        Some(handle) => handle
            .join()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "output relay thread panicked"))?,
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => 1,
    }
}

pub trait Prompter {
    fn confirm(&self, command: &str) -> Result<bool, BrewboxError>;
}

pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn confirm(&self, command: &str) -> Result<bool, BrewboxError> {
        eprintln!("{} {}", style("Command:").bold(), style(command).cyan());
        let answer = Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt("Run this command?")
            .default(false)
            .interact()?;
        Ok(answer)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub confirm: bool,
    pub stdin: StdinMode,
    pub output: OutputMode,
}

impl RunOptions {
    pub fn attached(confirm: bool) -> Self {
        Self {
            confirm,
            stdin: StdinMode::Inherit,
            output: OutputMode::Inherit,
        }
    }

    // Steps that must never block on input; they never prompt either.
    pub fn no_stdin() -> Self {
        Self {
            confirm: false,
            stdin: StdinMode::Null,
            output: OutputMode::Inherit,
        }
    }

    pub fn quiet() -> Self {
        Self {
            confirm: false,
            stdin: StdinMode::Null,
            output: OutputMode::Capture,
        }
    }

    pub fn tee_stdout(mut self) -> Self {
        self.output = OutputMode::Tee;
        self
    }
}

pub struct Pipeline<'a> {
    runner: &'a dyn ProcessRunner,
    prompter: &'a dyn Prompter,
    interactive: bool,
}

impl<'a> Pipeline<'a> {
    pub fn new(runner: &'a dyn ProcessRunner, prompter: &'a dyn Prompter, interactive: bool) -> Self {
        Self {
            runner,
            prompter,
            interactive,
        }
    }

    pub fn interactive(&self) -> bool {
        self.interactive
    }

    pub fn run(&self, steps: &[Step], opts: RunOptions) -> Result<Vec<CommandOutput>, BrewboxError> {
        let total = steps.len();
        let mut outputs = Vec::with_capacity(total);
        for (index, step) in steps.iter().enumerate() {
            let rendered = step.render();
            if opts.confirm
                && opts.stdin == StdinMode::Inherit
                && self.interactive
                && !self.prompter.confirm(&rendered)?
            {
                return Err(BrewboxError::UserDeclined(rendered));
            }
            debug!("Running command ({}/{}): {}", index + 1, total, rendered);
            let output = self
                .runner
                .run(step, opts.stdin, opts.output)
                .map_err(|err| runner_error(err, step, &rendered))?;
            if !output.success() {
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                return Err(BrewboxError::StepFailed {
                    step: index + 1,
                    total,
                    command: rendered,
                    status_code: output.status_code,
                    stderr: if stderr.is_empty() { None } else { Some(stderr) },
                });
            }
            outputs.push(output);
        }
        Ok(outputs)
    }
}

fn runner_error(err: io::Error, step: &Step, rendered: &str) -> BrewboxError {
    if let Some(cancelled) = err
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<Cancelled>())
    {
        return BrewboxError::Interrupted {
            command: rendered.to_string(),
            signal: cancelled.signal,
        };
    }
    let hint = if err.kind() == io::ErrorKind::NotFound {
        Some(format!(
            "install `{}` and ensure it is on your PATH",
            step.program
        ))
    } else {
        None
    };
    BrewboxError::Spawn {
        command: rendered.to_string(),
        hint,
        source: err,
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::cell::RefCell;

    #[derive(Debug, Clone)]
    pub struct RecordedCall {
        pub step: Step,
        pub stdin: StdinMode,
        pub output: OutputMode,
    }

    enum MockOutcome {
        Exited(CommandOutput),
        SpawnFailed(io::ErrorKind),
        Interrupted(i32),
    }

    #[derive(Default)]
    pub struct MockRunner {
        calls: RefCell<Vec<RecordedCall>>,
        outputs: RefCell<Vec<MockOutcome>>,
    }

    impl MockRunner {
        pub fn push_output(&self, status_code: i32, stdout: &str, stderr: &str) {
            self.outputs.borrow_mut().push(MockOutcome::Exited(CommandOutput {
                status_code,
                stdout: stdout.as_bytes().to_vec(),
                stderr: stderr.as_bytes().to_vec(),
            }));
        }

        pub fn push_spawn_error(&self, kind: io::ErrorKind) {
            self.outputs.borrow_mut().push(MockOutcome::SpawnFailed(kind));
        }

        pub fn push_interrupt(&self, signal: i32) {
            self.outputs.borrow_mut().push(MockOutcome::Interrupted(signal));
        }

        pub fn calls(&self) -> Vec<RecordedCall> {
            self.calls.borrow().clone()
        }

        pub fn programs(&self) -> Vec<String> {
            self.calls
                .borrow()
                .iter()
                .map(|call| call.step.render())
                .collect()
        }
    }

    impl ProcessRunner for MockRunner {
        fn run(
            &self,
            step: &Step,
            stdin: StdinMode,
            output: OutputMode,
        ) -> Result<CommandOutput, io::Error> {
            self.calls.borrow_mut().push(RecordedCall {
                step: step.clone(),
                stdin,
                output,
            });
            let mut queued = self.outputs.borrow_mut();
            if queued.is_empty() {
                return Ok(CommandOutput {
                    status_code: 0,
                    stdout: Vec::new(),
                    stderr: Vec::new(),
                });
            }
            match queued.remove(0) {
                MockOutcome::Exited(output) => Ok(output),
                MockOutcome::SpawnFailed(kind) => Err(io::Error::from(kind)),
                MockOutcome::Interrupted(signal) => Err(cancelled(signal)),
            }
        }
    }

    pub struct ScriptedPrompter {
        answers: RefCell<Vec<bool>>,
        pub asked: RefCell<Vec<String>>,
    }

    impl ScriptedPrompter {
        pub fn answering(answers: &[bool]) -> Self {
            Self {
                answers: RefCell::new(answers.to_vec()),
                asked: RefCell::new(Vec::new()),
            }
        }
    }

    impl Prompter for ScriptedPrompter {
        fn confirm(&self, command: &str) -> Result<bool, BrewboxError> {
            self.asked.borrow_mut().push(command.to_string());
            let mut answers = self.answers.borrow_mut();
            if answers.is_empty() {
                return Ok(true);
            }
            Ok(answers.remove(0))
        }
    }
}
