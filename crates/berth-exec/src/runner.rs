//! Runs shell commands over a transport and records each one,
//! with its output, in the execution ledger.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use berth_state::{
    ExecutionCategory, ExecutionKind, ExecutionTag, LogStream, NewExecution,
};

use crate::error::{ExecError, ExecResult};
use crate::poll::poll_until;
use crate::recorder::StepRecorder;
use crate::transport::Transport;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);
const PROBE_TIMEOUT: Duration = Duration::from_secs(15);
/// Stands in for secret values in the ledger and event stream.
pub const REDACTED: &str = "[redacted]";

/// Per-command options.
#[derive(Debug, Clone)]
pub struct ExecOptions {
    pub timeout: Option<Duration>,
    /// Return `CommandFailed` on a non-zero exit. On by default.
    pub raise_on_error: bool,
    pub tag: Option<ExecutionTag>,
    pub category: Option<ExecutionCategory>,
    pub kind: ExecutionKind,
    pub session: Option<String>,
    /// Values masked in the recorded command, its output lines and errors.
    /// The transport still receives them.
    pub secrets: Vec<String>,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            raise_on_error: true,
            tag: None,
            category: None,
            kind: ExecutionKind::Exec,
            session: None,
            secrets: Vec::new(),
        }
    }
}

impl ExecOptions {
    pub fn tagged(tag: ExecutionTag) -> Self {
        Self {
            tag: Some(tag),
            ..Self::default()
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn allow_failure(mut self) -> Self {
        self.raise_on_error = false;
        self
    }

    pub fn category(mut self, category: ExecutionCategory) -> Self {
        self.category = Some(category);
        self
    }

    pub fn session(mut self, session: impl Into<String>) -> Self {
        self.session = Some(session.into());
        self
    }

    /// Keep `value` out of the ledger. Empty values are ignored.
    pub fn secret(mut self, value: impl Into<String>) -> Self {
        let value = value.into();
        if !value.is_empty() {
            self.secrets.push(value);
        }
        self
    }

    pub fn secrets<I, S>(self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        values.into_iter().fold(self, |opts, v| opts.secret(v))
    }

    /// `text` with every registered secret masked.
    pub fn redact(&self, text: &str) -> String {
        self.secrets
            .iter()
            .fold(text.to_string(), |acc, secret| acc.replace(secret.as_str(), REDACTED))
    }
}

/// Captured result of one command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandOutput {
    /// Both streams interleaved in arrival order.
    pub output: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Default)]
struct Capture {
    output: Vec<String>,
    stdout: Vec<String>,
    stderr: Vec<String>,
}

impl Capture {
    fn into_output(self, exit_code: i32) -> CommandOutput {
        CommandOutput {
            output: self.output.join("\n"),
            stdout: self.stdout.join("\n"),
            stderr: self.stderr.join("\n"),
            exit_code,
        }
    }
}

#[derive(Clone)]
pub struct RemoteRunner {
    transport: Arc<dyn Transport>,
    recorder: StepRecorder,
    default_timeout: Duration,
}

impl RemoteRunner {
    pub fn new(transport: Arc<dyn Transport>, recorder: StepRecorder) -> Self {
        Self {
            transport,
            recorder,
            default_timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Same transport, recording under a different category.
    pub fn in_category(&self, category: ExecutionCategory) -> Self {
        Self {
            recorder: self.recorder.in_category(category),
            ..self.clone()
        }
    }

    pub fn recorder(&self) -> &StepRecorder {
        &self.recorder
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Run `command` and record it. Lines reach the event sink as they
    /// arrive and the ledger once the command ends.
    pub fn execute(&self, command: &str, opts: ExecOptions) -> ExecResult<CommandOutput> {
        let shown = opts.redact(command);
        let mut new = NewExecution::exec(self.recorder.owner(), &shown)
            .tag(opts.tag)
            .session(opts.session.clone());
        new.kind = opts.kind;
        if opts.category.is_some() {
            new = new.category(opts.category);
        }
        let execution = self.recorder.open(new)?;

        let owner = self.recorder.owner();
        let events = self.recorder.events().clone();
        let mut capture = Capture::default();
        let timeout = opts.timeout.unwrap_or(self.default_timeout);

        let result = self.transport.run(command, timeout, &mut |stream, line| {
            let line = opts.redact(line);
            events.on_log_line(owner, execution.id, stream, &line);
            capture.output.push(line.clone());
            match stream {
                LogStream::Stderr => capture.stderr.push(line),
                _ => capture.stdout.push(line),
            }
        });

        let store = self.recorder.store();
        store.append_log_lines(execution.id, LogStream::Stdout, &capture.stdout)?;
        store.append_log_lines(execution.id, LogStream::Stderr, &capture.stderr)?;

        let exit_code = match result {
            Ok(code) => code,
            Err(err) => {
                let message = opts.redact(&err.to_string());
                store.append_log_lines(execution.id, LogStream::Output, &[message.clone()])?;
                events.on_log_line(owner, execution.id, LogStream::Output, &message);
                store.finish_execution(execution.id, None)?;
                warn!(%owner, execution = execution.id, error = %message, "transport failure");
                return Err(err);
            }
        };
        store.finish_execution(execution.id, Some(exit_code))?;
        debug!(%owner, execution = execution.id, exit_code, "command finished");

        let output = capture.into_output(exit_code);
        if exit_code != 0 && opts.raise_on_error {
            return Err(ExecError::CommandFailed {
                command: shown,
                exit_code,
                output: output.output,
            });
        }
        Ok(output)
    }

    /// Shorthand: run a tagged command that must succeed.
    pub fn run(&self, command: &str, tag: ExecutionTag) -> ExecResult<CommandOutput> {
        self.execute(command, ExecOptions::tagged(tag))
    }

    /// Run a tagged probe whose exit code is the answer.
    pub fn check(&self, command: &str, tag: ExecutionTag) -> ExecResult<bool> {
        Ok(self
            .execute(command, ExecOptions::tagged(tag).allow_failure())?
            .success())
    }

    /// Run `command` outside the ledger and report whether it exited 0.
    /// Connection failures count as "no"; used inside polling loops.
    pub fn probe(&self, command: &str) -> ExecResult<bool> {
        match self.transport.run(command, PROBE_TIMEOUT, &mut |_, _| {}) {
            Ok(code) => Ok(code == 0),
            Err(ExecError::Connection(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Round-trip `true` until it succeeds. Probes bypass the ledger; the
    /// caller records the wait as one step.
    pub fn wait_until_ready(&self, max_attempts: u32, interval: Duration) -> ExecResult<()> {
        let mut last_error = None;
        let ready = poll_until(max_attempts, interval, || {
            match self.transport.run("true", PROBE_TIMEOUT, &mut |_, _| {}) {
                Ok(0) => Ok(Some(())),
                Ok(code) => {
                    last_error = Some(format!("probe exited with {code}"));
                    Ok(None)
                }
                Err(err @ ExecError::Ledger(_)) => Err(err),
                Err(err) => {
                    last_error = Some(err.to_string());
                    Ok(None)
                }
            }
        })?;
        ready.ok_or_else(|| {
            ExecError::connection(format!(
                "host not ready after {max_attempts} attempts{}",
                last_error.map(|e| format!(": {e}")).unwrap_or_default()
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::events::ProvisionEvents;
    use crate::testing::{Reply, ScriptedTransport};
    use berth_state::{ExecutionId, ExecutionOwner, StateStore};

    fn runner(transport: Arc<ScriptedTransport>) -> RemoteRunner {
        let store = StateStore::open_in_memory().unwrap();
        RemoteRunner::new(transport, StepRecorder::new(store, ExecutionOwner::Sandbox(1)))
    }

    #[test]
    fn success_records_exit_code_and_lines() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.on("ls", Reply::stdout("a\nb").with_stderr("warn"));
        let runner = runner(transport);

        let out = runner.run("ls /srv", ExecutionTag::Command).unwrap();
        assert_eq!(out.stdout, "a\nb");
        assert_eq!(out.stderr, "warn");
        assert_eq!(out.output, "a\nb\nwarn");

        let store = runner.recorder().store();
        let execs = store.list_executions(ExecutionOwner::Sandbox(1)).unwrap();
        assert_eq!(execs.len(), 1);
        assert_eq!(execs[0].exit_code, Some(0));
        assert_eq!(execs[0].tag, Some(ExecutionTag::Command));
        let lines = store.list_log_lines(execs[0].id).unwrap();
        let stdout: Vec<_> = lines
            .iter()
            .filter(|l| l.stream == LogStream::Stdout)
            .map(|l| (l.line_number, l.content.as_str()))
            .collect();
        assert_eq!(stdout, vec![(1, "a"), (2, "b")]);
    }

    #[test]
    fn nonzero_exit_raises_by_default() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.on("make", Reply::exit(2).with_stdout("boom"));
        let runner = runner(transport);

        let err = runner.run("make", ExecutionTag::Command).unwrap_err();
        match err {
            ExecError::CommandFailed { exit_code, output, .. } => {
                assert_eq!(exit_code, 2);
                assert_eq!(output, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
        let execs = runner
            .recorder()
            .store()
            .list_executions(ExecutionOwner::Sandbox(1))
            .unwrap();
        assert!(execs[0].failed());
    }

    #[test]
    fn allow_failure_returns_result() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.on("grep", Reply::exit(1));
        let runner = runner(transport);

        let out = runner
            .execute("grep x /etc/fstab", ExecOptions::default().allow_failure())
            .unwrap();
        assert_eq!(out.exit_code, 1);
        assert!(!runner.check("grep x /etc/fstab", ExecutionTag::Volume).unwrap());
    }

    #[test]
    fn transport_failure_leaves_exit_code_unset() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.on("uptime", Reply::connection_error("connection refused"));
        let runner = runner(transport);

        let err = runner.run("uptime", ExecutionTag::Command).unwrap_err();
        assert!(matches!(err, ExecError::Connection(_)));

        let store = runner.recorder().store();
        let exec = &store.list_executions(ExecutionOwner::Sandbox(1)).unwrap()[0];
        assert_eq!(exec.exit_code, None);
        assert!(exec.is_finished());
        let lines = store.list_log_lines(exec.id).unwrap();
        assert_eq!(lines[0].stream, LogStream::Output);
    }

    #[test]
    fn lines_stream_to_events_in_order() {
        #[derive(Default)]
        struct Collect(Mutex<Vec<String>>);
        impl ProvisionEvents for Collect {
            fn on_log_line(&self, _: ExecutionOwner, _: ExecutionId, _: LogStream, line: &str) {
                self.0.lock().unwrap().push(line.to_string());
            }
        }

        let transport = Arc::new(ScriptedTransport::new());
        transport.on("build", Reply::stdout("step 1\nstep 2\nstep 3"));
        let events = Arc::new(Collect::default());
        let store = StateStore::open_in_memory().unwrap();
        let recorder =
            StepRecorder::new(store, ExecutionOwner::Release(4)).with_events(events.clone());
        let runner = RemoteRunner::new(transport, recorder);

        runner.run("build", ExecutionTag::ImageBuild).unwrap();
        assert_eq!(*events.0.lock().unwrap(), vec!["step 1", "step 2", "step 3"]);
    }

    #[test]
    fn secrets_never_reach_the_ledger() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.on("login", Reply::exit(1).with_stdout("bad token hunter2"));
        let runner = runner(transport.clone());

        let err = runner
            .execute("login --token hunter2", ExecOptions::default().secret("hunter2"))
            .unwrap_err();
        match err {
            ExecError::CommandFailed { command, output, .. } => {
                assert_eq!(command, "login --token [redacted]");
                assert_eq!(output, "bad token [redacted]");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(transport.ran("login --token hunter2"));

        let store = runner.recorder().store();
        let exec = &store.list_executions(ExecutionOwner::Sandbox(1)).unwrap()[0];
        assert_eq!(exec.command, "login --token [redacted]");
        let lines = store.list_log_lines(exec.id).unwrap();
        assert!(lines.iter().all(|l| !l.content.contains("hunter2")));
    }

    #[test]
    fn empty_secret_is_ignored() {
        let opts = ExecOptions::default().secret("").secrets(["a-b"]);
        assert_eq!(opts.secrets, vec!["a-b".to_string()]);
        assert_eq!(opts.redact("x a-b y"), "x [redacted] y");
    }

    #[test]
    fn wait_until_ready_retries_then_succeeds() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.unreachable_for(3);
        let runner = runner(transport.clone());

        runner.wait_until_ready(5, Duration::ZERO).unwrap();
        assert_eq!(transport.count("true"), 4);
        let execs = runner
            .recorder()
            .store()
            .list_executions(ExecutionOwner::Sandbox(1))
            .unwrap();
        assert!(execs.is_empty());
    }

    #[test]
    fn probe_skips_ledger() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.on("test -f", Reply::exit(1));
        let runner = runner(transport.clone());

        assert!(!runner.probe("test -f /done").unwrap());
        transport.unreachable_for(1);
        assert!(!runner.probe("true").unwrap());
        assert!(runner.probe("true").unwrap());
        assert!(
            runner
                .recorder()
                .store()
                .list_executions(ExecutionOwner::Sandbox(1))
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn wait_until_ready_exhaustion_is_connection_error() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.unreachable_for(10);
        let runner = runner(transport);

        let err = runner.wait_until_ready(3, Duration::ZERO).unwrap_err();
        assert!(matches!(err, ExecError::Connection(msg) if msg.contains("3 attempts")));
    }
}
