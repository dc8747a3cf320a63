//! Domain types for the Berth state store.
//!
//! Sandboxes and releases are plain state-machine entities; executions and
//! their log lines form the append-only ledger of everything run on their
//! behalf. All types serialize to JSON for storage in redb tables.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

pub type SandboxId = u64;
pub type ReleaseId = u64;
pub type ExecutionId = u64;

/// Current unix time in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// An SSH keypair in OpenSSH text form.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct SshKeyPair {
    pub private_key: String,
    pub public_key: String,
}

impl fmt::Debug for SshKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshKeyPair")
            .field("private_key", &"<redacted>")
            .field("public_key", &self.public_key)
            .finish()
    }
}

// ── Sandbox ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxState {
    Pending,
    Provisioning,
    Running,
    Stopped,
    Failed,
}

/// An ephemeral development environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sandbox {
    pub id: SandboxId,
    /// Six lowercase hex characters. Assigned once, never changed.
    pub slug: String,
    pub state: SandboxState,
    pub ssh_key: Option<SshKeyPair>,
    /// Whether the sandbox is published through a public tunnel.
    pub exposed: bool,
    pub access_token: String,
    pub last_error: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Sandbox {
    pub fn table_key(&self) -> String {
        id_key(self.id)
    }
}

// ── Release ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseState {
    Pending,
    Deploying,
    Deployed,
    Failed,
    TornDown,
}

/// A production deployment of one environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Release {
    pub id: ReleaseId,
    pub environment: String,
    pub branch: String,
    pub state: ReleaseState,
    pub server_id: Option<String>,
    pub server_ip: Option<String>,
    pub private_ip: Option<String>,
    pub ssh_key: Option<SshKeyPair>,
    pub tunnel_id: Option<String>,
    /// Fully qualified image reference of the last build.
    pub registry_tag: Option<String>,
    pub last_error: Option<String>,
    pub deployed_at: Option<u64>,
    /// Generated once per database kind and reused on every run.
    #[serde(default)]
    pub database_passwords: BTreeMap<String, String>,
    /// Server the cluster bootstrap last completed on.
    pub bootstrapped_server_id: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Release {
    pub fn table_key(&self) -> String {
        id_key(self.id)
    }
}

// ── Execution ledger ──────────────────────────────────────────────

/// What an execution was run on behalf of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum ExecutionOwner {
    Sandbox(SandboxId),
    Release(ReleaseId),
}

impl fmt::Display for ExecutionOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionOwner::Sandbox(id) => write!(f, "sandbox/{id}"),
            ExecutionOwner::Release(id) => write!(f, "release/{id}"),
        }
    }
}

/// `Exec` is a remote shell command; `Process` is a step the engine
/// performs itself (a reconcile call, a state transition).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionKind {
    Exec,
    Process,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionCategory {
    Provision,
    Bootstrap,
    Deploy,
    Teardown,
    Operator,
}

impl ExecutionCategory {
    pub fn label(&self) -> &'static str {
        match self {
            ExecutionCategory::Provision => "Provisioning",
            ExecutionCategory::Bootstrap => "Cluster bootstrap",
            ExecutionCategory::Deploy => "Deployment",
            ExecutionCategory::Teardown => "Teardown",
            ExecutionCategory::Operator => "Operator command",
        }
    }
}

/// Named workflow step. Closed set; every ledger row of a workflow carries one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionTag {
    StateTransition,
    SshKeypair,
    Firewall,
    Network,
    SshKey,
    Server,
    SshReady,
    SystemDependencies,
    GitCredentials,
    Clone,
    EnvFile,
    ComposeFile,
    Datastores,
    Setup,
    Services,
    Tunnel,
    TunnelClient,
    DnsRecord,
    WorkerRoute,
    CloudInit,
    DiscoverNetwork,
    ContainerRuntime,
    DaemonConfig,
    RegistryMirror,
    ClusterInstall,
    ClusterReady,
    Kubeconfig,
    PriorityClasses,
    Registry,
    Ingress,
    Volume,
    SourceSync,
    ImageBuild,
    ImagePush,
    ImagePrune,
    ManifestApply,
    Rollout,
    Containers,
    Command,
    Scale,
    Restart,
}

impl ExecutionTag {
    /// Human-readable step name.
    pub fn label(&self) -> &'static str {
        match self {
            ExecutionTag::StateTransition => "State transition",
            ExecutionTag::SshKeypair => "Generating SSH keypair",
            ExecutionTag::Firewall => "Reconciling firewall",
            ExecutionTag::Network => "Reconciling private network",
            ExecutionTag::SshKey => "Registering SSH key",
            ExecutionTag::Server => "Reconciling server",
            ExecutionTag::SshReady => "Waiting for SSH",
            ExecutionTag::SystemDependencies => "Installing system dependencies",
            ExecutionTag::GitCredentials => "Configuring git credentials",
            ExecutionTag::Clone => "Cloning repository",
            ExecutionTag::EnvFile => "Writing environment file",
            ExecutionTag::ComposeFile => "Writing compose file",
            ExecutionTag::Datastores => "Starting datastores",
            ExecutionTag::Setup => "Running setup commands",
            ExecutionTag::Services => "Starting services",
            ExecutionTag::Tunnel => "Reconciling tunnel",
            ExecutionTag::TunnelClient => "Starting tunnel client",
            ExecutionTag::DnsRecord => "Reconciling DNS records",
            ExecutionTag::WorkerRoute => "Reconciling edge worker",
            ExecutionTag::CloudInit => "Waiting for cloud-init",
            ExecutionTag::DiscoverNetwork => "Discovering node addresses",
            ExecutionTag::ContainerRuntime => "Installing container runtime",
            ExecutionTag::DaemonConfig => "Configuring container daemon",
            ExecutionTag::RegistryMirror => "Configuring registry mirror",
            ExecutionTag::ClusterInstall => "Installing cluster",
            ExecutionTag::ClusterReady => "Waiting for cluster",
            ExecutionTag::Kubeconfig => "Writing kubeconfig",
            ExecutionTag::PriorityClasses => "Applying priority classes",
            ExecutionTag::Registry => "Deploying image registry",
            ExecutionTag::Ingress => "Deploying ingress controller",
            ExecutionTag::Volume => "Mounting volume",
            ExecutionTag::SourceSync => "Syncing source",
            ExecutionTag::ImageBuild => "Building image",
            ExecutionTag::ImagePush => "Pushing image",
            ExecutionTag::ImagePrune => "Pruning old images",
            ExecutionTag::ManifestApply => "Applying manifests",
            ExecutionTag::Rollout => "Waiting for rollout",
            ExecutionTag::Containers => "Stopping containers",
            ExecutionTag::Command => "Running command",
            ExecutionTag::Scale => "Scaling process",
            ExecutionTag::Restart => "Restarting process",
        }
    }
}

/// One command run (or engine step) and its outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: ExecutionId,
    pub owner: ExecutionOwner,
    pub command: String,
    pub kind: ExecutionKind,
    pub tag: Option<ExecutionTag>,
    pub category: Option<ExecutionCategory>,
    /// Unset until the command completes.
    pub exit_code: Option<i32>,
    pub started_at: u64,
    pub finished_at: Option<u64>,
    pub session: Option<String>,
}

impl Execution {
    pub fn table_key(&self) -> String {
        id_key(self.id)
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    /// True only when the command completed with a non-zero exit code.
    pub fn failed(&self) -> bool {
        self.exit_code.is_some_and(|code| code != 0)
    }
}

/// Everything needed to open a ledger entry.
#[derive(Debug, Clone, PartialEq)]
pub struct NewExecution {
    pub owner: ExecutionOwner,
    pub command: String,
    pub kind: ExecutionKind,
    pub tag: Option<ExecutionTag>,
    pub category: Option<ExecutionCategory>,
    pub session: Option<String>,
}

impl NewExecution {
    pub fn exec(owner: ExecutionOwner, command: impl Into<String>) -> Self {
        Self {
            owner,
            command: command.into(),
            kind: ExecutionKind::Exec,
            tag: None,
            category: None,
            session: None,
        }
    }

    pub fn process(owner: ExecutionOwner, command: impl Into<String>) -> Self {
        Self {
            kind: ExecutionKind::Process,
            ..Self::exec(owner, command)
        }
    }

    pub fn tag(mut self, tag: Option<ExecutionTag>) -> Self {
        self.tag = tag;
        self
    }

    pub fn category(mut self, category: Option<ExecutionCategory>) -> Self {
        self.category = category;
        self
    }

    pub fn session(mut self, session: Option<String>) -> Self {
        self.session = session;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStream {
    Stdout,
    Stderr,
    /// Engine-produced output (step summaries, transport errors).
    Output,
}

impl LogStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStream::Stdout => "stdout",
            LogStream::Stderr => "stderr",
            LogStream::Output => "output",
        }
    }
}

/// One line of output of an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLogLine {
    pub execution_id: ExecutionId,
    pub stream: LogStream,
    /// Starts at 1; scoped to (execution, stream).
    pub line_number: u64,
    pub content: String,
}

impl ExecutionLogLine {
    /// Unique key: `(execution, stream, line_number)`.
    pub fn table_key(&self) -> String {
        log_line_key(self.execution_id, self.stream, self.line_number)
    }
}

/// Zero-padded id key so lexical order matches numeric order.
pub fn id_key(id: u64) -> String {
    format!("{id:016}")
}

pub(crate) fn log_line_key(execution_id: ExecutionId, stream: LogStream, line: u64) -> String {
    format!("{}:{}:{line:010}", id_key(execution_id), stream.as_str())
}

/// Key range covering every line of one (execution, stream) pair.
pub(crate) fn log_stream_range(execution_id: ExecutionId, stream: LogStream) -> (String, String) {
    let base = format!("{}:{}", id_key(execution_id), stream.as_str());
    // ';' sorts directly after ':'.
    (format!("{base}:"), format!("{base};"))
}

/// Key range covering every line of one execution.
pub(crate) fn log_execution_range(execution_id: ExecutionId) -> (String, String) {
    let base = id_key(execution_id);
    (format!("{base}:"), format!("{base};"))
}
