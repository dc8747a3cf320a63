//! Sandbox workflow tests.

use std::sync::Arc;

use berth_cloud::memory::{MemoryCompute, MemoryEdge};
use berth_cloud::IngressRule;
use berth_core::{BerthConfig, DatabaseConfig, ProcessConfig, TimeoutsConfig, ToolConfig};
use berth_exec::testing::{Reply, ScriptedFactory, ScriptedTransport};
use berth_provision::keys::FixedKeys;
use berth_provision::{Backends, ProvisionError, SandboxProvisioner};
use berth_state::*;

fn sandbox_config() -> BerthConfig {
    let mut config = BerthConfig::builder("shop")
        .repository("https://github.com/acme/shop.git", None)
        .database(DatabaseConfig::postgres())
        .process("web", ProcessConfig::new("bin/server").port(3000))
        .tunnel("example.com", "zone-1")
        .setup_command("bin/rails db:prepare")
        .timeouts(TimeoutsConfig::immediate())
        .build()
        .unwrap();
    config.sandbox.tools = vec![ToolConfig {
        name: "jq".to_string(),
        install: "apt-get install -y jq".to_string(),
    }];
    config
}

struct World {
    store: StateStore,
    compute: Arc<MemoryCompute>,
    edge: Arc<MemoryEdge>,
    transport: Arc<ScriptedTransport>,
    backends: Backends,
}

fn world() -> World {
    let store = StateStore::open_in_memory().unwrap();
    let compute = Arc::new(MemoryCompute::new());
    let edge = Arc::new(MemoryEdge::new());
    let transport = Arc::new(ScriptedTransport::new());
    let backends = Backends::new(
        store.clone(),
        compute.clone(),
        Arc::new(ScriptedFactory::new(transport.clone())),
    )
    .with_edge(edge.clone())
    .with_keys(Arc::new(FixedKeys));
    World {
        store,
        compute,
        edge,
        transport,
        backends,
    }
}

fn provisioner(w: &World, exposed: bool) -> (Sandbox, SandboxProvisioner) {
    let sandbox = w.store.create_sandbox(exposed).unwrap();
    let provisioner = SandboxProvisioner::new(sandbox_config(), w.backends.clone(), sandbox.id);
    (sandbox, provisioner)
}

#[test]
fn exposed_sandbox_runs_every_step_in_order() {
    let w = world();
    let (sandbox, provisioner) = provisioner(&w, true);
    let slug = sandbox.slug.clone();
    let prefix = format!("shop-{slug}");

    let running = provisioner.provision().unwrap();
    assert_eq!(running.state, SandboxState::Running);
    assert!(running.ssh_key.is_some());

    let server = w.compute.server(&prefix).unwrap();
    assert_eq!(server.labels.get("purpose").map(String::as_str), Some("sandbox"));
    assert_eq!(server.labels.get("slug"), Some(&slug));

    let order = [
        "command -v jq".to_string(),
        "git clone".to_string(),
        format!("git checkout -b sandbox/{slug} origin/main"),
        "/srv/app/.env".to_string(),
        "/srv/app/docker-compose.berth.yml".to_string(),
        "up -d --wait postgres".to_string(),
        "run --rm web sh -c 'bin/rails db:prepare'".to_string(),
        "up -d --build --remove-orphans".to_string(),
        "cloudflare/cloudflared".to_string(),
    ];
    let positions: Vec<usize> = order
        .iter()
        .map(|needle| {
            w.transport
                .position(needle)
                .unwrap_or_else(|| panic!("{needle} not run"))
        })
        .collect();
    assert!(positions.windows(2).all(|p| p[0] < p[1]), "{positions:?}");
    assert!(w.transport.ran(&format!("docker compose -p {prefix}")));

    assert_eq!(
        w.edge.ingress(&prefix),
        vec![IngressRule {
            hostname: format!("{slug}.example.com"),
            service: "http://localhost:3000".to_string(),
        }]
    );
    assert_eq!(w.edge.dns_names(), vec![format!("{slug}.example.com")]);
}

#[test]
fn private_sandbox_has_no_tunnel() {
    let w = world();
    let (_, provisioner) = provisioner(&w, false);
    provisioner.provision().unwrap();
    assert!(w.edge.is_empty());
    assert!(!w.transport.ran("cloudflared"));
}

#[test]
fn env_file_points_at_compose_services() {
    let w = world();
    let (sandbox, provisioner) = provisioner(&w, false);
    provisioner.provision().unwrap();

    let env_write = w
        .transport
        .commands()
        .into_iter()
        .find(|c| c.contains("/srv/app/.env"))
        .unwrap();
    assert!(env_write.contains("DATABASE_URL=postgresql://app:"));
    assert!(env_write.contains("@postgres:5432/app"));
    assert!(env_write.contains("chmod 600"));
    assert!(env_write.contains(&berth_provision::sandbox::database_password(&sandbox)));
}

#[test]
fn tokens_and_passwords_stay_out_of_the_ledger() {
    // SAFETY: the variable name is unique to this test.
    unsafe { std::env::set_var("BERTH_SANDBOX_LEDGER_TOKEN", "ghp_sandbox_secret") };
    let w = world();
    let mut config = sandbox_config();
    if let Some(repo) = config.repository.as_mut() {
        repo.token_env = Some("BERTH_SANDBOX_LEDGER_TOKEN".to_string());
    }
    let sandbox = w.store.create_sandbox(true).unwrap();
    let provisioner = SandboxProvisioner::new(config, w.backends.clone(), sandbox.id);
    provisioner.provision().unwrap();

    let prefix = format!("shop-{}", sandbox.slug);
    let tunnel_token = format!("token-{}", w.edge.tunnel_id(&prefix).unwrap());
    let password = berth_provision::sandbox::database_password(&sandbox);
    assert!(w.transport.ran("x-access-token:ghp_sandbox_secret@github.com"));
    assert!(w.transport.ran(&format!("--token {tunnel_token}")));

    let mut ledger = Vec::new();
    for execution in w
        .store
        .list_executions(ExecutionOwner::Sandbox(sandbox.id))
        .unwrap()
    {
        for line in w.store.list_log_lines(execution.id).unwrap() {
            ledger.push(line.content);
        }
        ledger.push(execution.command);
    }
    for secret in ["ghp_sandbox_secret", tunnel_token.as_str(), password.as_str()] {
        assert!(
            ledger.iter().all(|entry| !entry.contains(secret)),
            "{secret} recorded in the ledger"
        );
    }
    assert!(ledger.iter().any(|entry| entry.contains("--token [redacted]")));
}

#[test]
fn running_sandbox_is_left_alone() {
    let w = world();
    let (sandbox, provisioner) = provisioner(&w, true);
    provisioner.provision().unwrap();

    let commands = w.transport.commands().len();
    let rows = w
        .store
        .list_executions(ExecutionOwner::Sandbox(sandbox.id))
        .unwrap()
        .len();

    let again = provisioner.provision().unwrap();
    assert_eq!(again.state, SandboxState::Running);
    assert_eq!(w.transport.commands().len(), commands);
    assert_eq!(
        w.store
            .list_executions(ExecutionOwner::Sandbox(sandbox.id))
            .unwrap()
            .len(),
        rows
    );
}

#[test]
fn failure_is_recorded_and_rerun_reuses_resources() {
    let w = world();
    w.transport.on_once(
        "up -d --wait",
        Reply::exit(1).with_stderr("dependency failed to start: container postgres is unhealthy"),
    );
    let (sandbox, provisioner) = provisioner(&w, false);

    let err = provisioner.provision().unwrap_err();
    assert!(matches!(
        err,
        ProvisionError::Exec(berth_exec::ExecError::CommandFailed { exit_code: 1, .. })
    ));
    let failed = w.store.require_sandbox(sandbox.id).unwrap();
    assert_eq!(failed.state, SandboxState::Failed);
    assert!(failed.last_error.unwrap().contains("unhealthy"));
    let key = failed.ssh_key.clone().unwrap();

    let failed_rows: Vec<Execution> = w
        .store
        .list_executions(ExecutionOwner::Sandbox(sandbox.id))
        .unwrap()
        .into_iter()
        .filter(|e| e.failed())
        .collect();
    assert_eq!(failed_rows.len(), 1);
    assert_eq!(failed_rows[0].tag, Some(ExecutionTag::Datastores));

    let running = provisioner.provision().unwrap();
    assert_eq!(running.state, SandboxState::Running);
    assert!(running.last_error.is_none());
    assert_eq!(running.ssh_key.unwrap().public_key, key.public_key);
    assert_eq!(w.compute.create_calls("server"), 1);
    assert_eq!(w.compute.create_calls("firewall"), 1);
}

#[test]
fn teardown_without_resources_succeeds() {
    let w = world();
    let (_, provisioner) = provisioner(&w, true);
    let stopped = provisioner.deprovision().unwrap();
    assert_eq!(stopped.state, SandboxState::Stopped);
    assert!(w.transport.commands().is_empty());
    assert!(w.compute.deletions().is_empty());
}

#[test]
fn teardown_removes_tunnel_containers_and_server() {
    let w = world();
    let (sandbox, provisioner) = provisioner(&w, true);
    provisioner.provision().unwrap();

    let stopped = provisioner.deprovision().unwrap();
    assert_eq!(stopped.state, SandboxState::Stopped);
    assert!(w.edge.is_empty());
    assert!(w.compute.is_empty());
    assert!(w.transport.ran("down -v --remove-orphans"));

    let prefix = format!("shop-{}", sandbox.slug);
    assert_eq!(
        w.compute.deletions(),
        vec![
            format!("server:{prefix}"),
            format!("ssh_key:{prefix}"),
            format!("network:{prefix}"),
            format!("firewall:{prefix}"),
        ]
    );
}

#[test]
fn teardown_continues_when_server_is_unreachable() {
    let w = world();
    let (_, provisioner) = provisioner(&w, false);
    provisioner.provision().unwrap();
    w.transport
        .on("down -v", Reply::connection_error("no route to host"));

    let stopped = provisioner.deprovision().unwrap();
    assert_eq!(stopped.state, SandboxState::Stopped);
    assert!(w.compute.is_empty());
}

#[test]
fn failed_sandbox_can_be_torn_down() {
    let w = world();
    w.transport.on("up -d --build", Reply::exit(1));
    let (_, provisioner) = provisioner(&w, false);
    provisioner.provision().unwrap_err();

    let stopped = provisioner.deprovision().unwrap();
    assert_eq!(stopped.state, SandboxState::Stopped);
    assert!(stopped.last_error.is_none());
    assert!(w.compute.is_empty());
}
