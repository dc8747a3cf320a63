//! In-process transport for tests: replies from substring rules and records
//! every command it was asked to run.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use berth_state::LogStream;

use crate::error::{ExecError, ExecResult};
use crate::transport::{LineSink, SshTarget, Transport, TransportFactory};

/// Canned reaction to a matching command.
#[derive(Debug, Clone, Default)]
pub struct Reply {
    pub exit_code: i32,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub error: Option<ReplyError>,
}

#[derive(Debug, Clone)]
pub enum ReplyError {
    Connection(String),
    Authentication(String),
}

fn split(text: &str) -> Vec<String> {
    text.lines().map(str::to_string).collect()
}

impl Reply {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn stdout(text: &str) -> Self {
        Self::ok().with_stdout(text)
    }

    pub fn exit(code: i32) -> Self {
        Self {
            exit_code: code,
            ..Self::default()
        }
    }

    pub fn connection_error(message: &str) -> Self {
        Self {
            error: Some(ReplyError::Connection(message.to_string())),
            ..Self::default()
        }
    }

    pub fn auth_error(message: &str) -> Self {
        Self {
            error: Some(ReplyError::Authentication(message.to_string())),
            ..Self::default()
        }
    }

    pub fn with_stdout(mut self, text: &str) -> Self {
        self.stdout.extend(split(text));
        self
    }

    pub fn with_stderr(mut self, text: &str) -> Self {
        self.stderr.extend(split(text));
        self
    }
}

struct Rule {
    pattern: String,
    reply: Reply,
    once: bool,
}

#[derive(Default)]
struct Script {
    rules: Vec<Rule>,
    commands: Vec<String>,
    unreachable: u32,
}

/// Scripted [`Transport`]. Unmatched commands succeed silently. The most
/// recently added matching rule wins; `on_once` rules are consumed on use.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<Script>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn on(&self, pattern: &str, reply: Reply) -> &Self {
        self.lock().rules.push(Rule {
            pattern: pattern.to_string(),
            reply,
            once: false,
        });
        self
    }

    pub fn on_once(&self, pattern: &str, reply: Reply) -> &Self {
        self.lock().rules.push(Rule {
            pattern: pattern.to_string(),
            reply,
            once: true,
        });
        self
    }

    /// Fail the next `calls` commands with a connection error.
    pub fn unreachable_for(&self, calls: u32) {
        self.lock().unreachable = calls;
    }

    pub fn commands(&self) -> Vec<String> {
        self.lock().commands.clone()
    }

    pub fn count(&self, needle: &str) -> usize {
        self.lock()
            .commands
            .iter()
            .filter(|c| c.contains(needle))
            .count()
    }

    pub fn ran(&self, needle: &str) -> bool {
        self.count(needle) > 0
    }

    /// Index of the first command containing `needle`.
    pub fn position(&self, needle: &str) -> Option<usize> {
        self.lock().commands.iter().position(|c| c.contains(needle))
    }

    pub fn clear(&self) {
        self.lock().commands.clear();
    }
}

impl Transport for ScriptedTransport {
    fn run(&self, command: &str, _timeout: Duration, on_line: &mut LineSink<'_>) -> ExecResult<i32> {
        let reply = {
            let mut script = self.lock();
            script.commands.push(command.to_string());
            if script.unreachable > 0 {
                script.unreachable -= 1;
                return Err(ExecError::connection("scripted host unreachable"));
            }
            let found = script
                .rules
                .iter()
                .rposition(|rule| command.contains(&rule.pattern));
            match found {
                Some(index) if script.rules[index].once => script.rules.remove(index).reply,
                Some(index) => script.rules[index].reply.clone(),
                None => Reply::ok(),
            }
        };

        for line in &reply.stdout {
            on_line(LogStream::Stdout, line);
        }
        for line in &reply.stderr {
            on_line(LogStream::Stderr, line);
        }
        match reply.error {
            Some(ReplyError::Connection(message)) => Err(ExecError::Connection(message)),
            Some(ReplyError::Authentication(message)) => Err(ExecError::Authentication {
                host: "scripted".to_string(),
                message,
            }),
            None => Ok(reply.exit_code),
        }
    }
}

/// Hands out the same scripted transport for every target and remembers
/// which hosts were connected to.
pub struct ScriptedFactory {
    transport: Arc<ScriptedTransport>,
    hosts: Mutex<Vec<String>>,
}

impl ScriptedFactory {
    pub fn new(transport: Arc<ScriptedTransport>) -> Self {
        Self {
            transport,
            hosts: Mutex::new(Vec::new()),
        }
    }

    pub fn transport(&self) -> &Arc<ScriptedTransport> {
        &self.transport
    }

    pub fn hosts(&self) -> Vec<String> {
        self.hosts
            .lock()
            .map(|h| h.clone())
            .unwrap_or_default()
    }
}

impl TransportFactory for ScriptedFactory {
    fn connect(&self, target: &SshTarget) -> ExecResult<Arc<dyn Transport>> {
        if let Ok(mut hosts) = self.hosts.lock() {
            hosts.push(target.host.clone());
        }
        Ok(self.transport.clone())
    }
}
