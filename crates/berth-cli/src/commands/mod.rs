use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;
use berth_core::BerthConfig;
use berth_exec::{SshTransportFactory, TracingEvents};
use berth_provision::{Backends, Operator};
use berth_state::StateStore;
use tracing::debug;

use crate::offline::OfflineCompute;

pub mod logs;
pub mod remote;

/// Config, store and operator shared by every subcommand.
pub struct Context {
    pub operator: Operator,
}

impl Context {
    pub fn load(config_path: &Path, state_path: &Path) -> anyhow::Result<Self> {
        let config = BerthConfig::from_file(config_path)
            .with_context(|| format!("loading {}", config_path.display()))?;
        let store = open_store(state_path)?;
        let backends = Backends::new(
            store,
            Arc::new(OfflineCompute),
            Arc::new(SshTransportFactory::default()),
        )
        .with_events(Arc::new(TracingEvents));
        debug!(app = %config.app_name, "operator ready");
        Ok(Self {
            operator: Operator::new(config, backends),
        })
    }
}

fn open_store(path: &Path) -> anyhow::Result<StateStore> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    StateStore::open(path).with_context(|| format!("opening state at {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
app_name = "shop"

[compute]
server_type = "cx22"

[processes.web]
command = "bin/server"
port = 3000
"#;

    #[test]
    fn loads_config_and_creates_state_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("berth.toml");
        std::fs::write(&config, CONFIG).unwrap();
        let state = dir.path().join(".berth").join("state.redb");

        Context::load(&config, &state).unwrap();
        assert!(state.exists());
    }

    #[test]
    fn missing_config_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Context::load(&dir.path().join("nope.toml"), &dir.path().join("s.redb"))
            .err()
            .unwrap();
        assert!(format!("{err:#}").contains("nope.toml"));
    }
}
