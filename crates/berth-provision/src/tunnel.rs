//! Public tunnel, DNS records and optional edge worker for one owner.

use berth_cloud::{
    DnsRecordSpec, DnsRecords, EdgeProvider, IngressRule, ManagedResource, TunnelSpec, Tunnels,
    WorkerRouteSpec, WorkerRoutes,
};
use berth_core::TunnelConfig;
use berth_exec::StepRecorder;
use berth_state::ExecutionTag;
use tracing::info;

use crate::error::{ProvisionError, ProvisionResult};

/// A reconciled tunnel and its connector token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelHandle {
    pub id: String,
    pub token: String,
}

pub struct TunnelReconciler<'a> {
    edge: &'a dyn EdgeProvider,
    config: &'a TunnelConfig,
    recorder: &'a StepRecorder,
}

impl<'a> TunnelReconciler<'a> {
    pub fn new(edge: &'a dyn EdgeProvider, config: &'a TunnelConfig, recorder: &'a StepRecorder) -> Self {
        Self {
            edge,
            config,
            recorder,
        }
    }

    /// Tunnel `name` routing `ingress`, with a proxied CNAME per hostname.
    pub fn ensure(&self, name: &str, ingress: &[IngressRule]) -> ProvisionResult<TunnelHandle> {
        let tunnel = self
            .recorder
            .step(ExecutionTag::Tunnel, &format!("tunnel {name}"), || {
                let spec = TunnelSpec {
                    ingress: ingress.to_vec(),
                };
                let tunnel = Tunnels(self.edge).find_or_create(name, &spec)?;
                self.edge.configure_tunnel(&tunnel.id, ingress)?;
                Ok::<_, ProvisionError>(tunnel)
            })?;

        let records = DnsRecords {
            provider: self.edge,
            zone_id: &self.config.zone_id,
        };
        for rule in ingress {
            self.recorder
                .step(ExecutionTag::DnsRecord, &format!("dns {}", rule.hostname), || {
                    records
                        .find_or_create(&rule.hostname, &DnsRecordSpec::tunnel_cname(&tunnel))
                        .map_err(ProvisionError::from)
                })?;
        }

        if let Some(worker) = &self.config.worker {
            let routes = WorkerRoutes {
                provider: self.edge,
                zone_id: &self.config.zone_id,
            };
            self.recorder
                .step(ExecutionTag::WorkerRoute, &format!("worker {}", worker.name), || {
                    self.edge
                        .deploy_worker(&worker.name, &worker.script)
                        .map_err(ProvisionError::from)
                })?;
            for rule in ingress {
                let pattern = route_pattern(&rule.hostname);
                self.recorder
                    .step(ExecutionTag::WorkerRoute, &format!("worker route {pattern}"), || {
                        let spec = WorkerRouteSpec {
                            script: worker.name.clone(),
                        };
                        routes
                            .find_or_create(&pattern, &spec)
                            .map_err(ProvisionError::from)
                    })?;
            }
        }

        let token = self.edge.tunnel_token(&tunnel.id)?;
        info!(tunnel = name, hosts = ingress.len(), "tunnel ready");
        Ok(TunnelHandle {
            id: tunnel.id,
            token,
        })
    }

    /// Remove worker routes, DNS records and the tunnel, in that order. The
    /// worker script itself is shared by every owner of the app and stays.
    pub fn teardown(&self, name: &str, hostnames: &[String]) -> ProvisionResult<()> {
        if self.config.worker.is_some() {
            let routes = WorkerRoutes {
                provider: self.edge,
                zone_id: &self.config.zone_id,
            };
            for host in hostnames {
                let pattern = route_pattern(host);
                self.recorder.step(
                    ExecutionTag::WorkerRoute,
                    &format!("delete worker route {pattern}"),
                    || routes.delete_if_exists(&pattern).map_err(ProvisionError::from),
                )?;
            }
        }

        let records = DnsRecords {
            provider: self.edge,
            zone_id: &self.config.zone_id,
        };
        for host in hostnames {
            self.recorder
                .step(ExecutionTag::DnsRecord, &format!("delete dns {host}"), || {
                    records.delete_if_exists(host).map_err(ProvisionError::from)
                })?;
        }

        self.recorder
            .step(ExecutionTag::Tunnel, &format!("delete tunnel {name}"), || {
                Tunnels(self.edge)
                    .delete_if_exists(name)
                    .map_err(ProvisionError::from)
            })?;
        Ok(())
    }
}

/// Worker route covering every path of `hostname`.
pub fn route_pattern(hostname: &str) -> String {
    format!("{hostname}/*")
}

#[cfg(test)]
mod tests {
    use super::*;
    use berth_cloud::memory::MemoryEdge;
    use berth_core::WorkerConfig;
    use berth_state::{ExecutionOwner, StateStore};

    fn config(worker: bool) -> TunnelConfig {
        TunnelConfig {
            zone: "example.com".into(),
            zone_id: "zone-1".into(),
            worker: worker.then(|| WorkerConfig {
                name: "banner".into(),
                script: "addEventListener('fetch', () => {})".into(),
            }),
        }
    }

    fn rules() -> Vec<IngressRule> {
        vec![IngressRule {
            hostname: "app.example.com".into(),
            service: "http://localhost:30080".into(),
        }]
    }

    #[test]
    fn ensure_is_idempotent() {
        let edge = MemoryEdge::new();
        let recorder = StepRecorder::new(StateStore::open_in_memory().unwrap(), ExecutionOwner::Release(1));
        let config = config(false);
        let tunnels = TunnelReconciler::new(&edge, &config, &recorder);

        let first = tunnels.ensure("shop-staging", &rules()).unwrap();
        let second = tunnels.ensure("shop-staging", &rules()).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.token, format!("token-{}", first.id));
        assert_eq!(edge.create_calls("tunnel"), 1);
        assert_eq!(edge.create_calls("dns_record"), 1);
        assert_eq!(edge.ingress("shop-staging"), rules());
        assert_eq!(edge.dns_names(), vec!["app.example.com"]);
    }

    #[test]
    fn teardown_removes_dependents_first() {
        let edge = MemoryEdge::new();
        let recorder = StepRecorder::new(StateStore::open_in_memory().unwrap(), ExecutionOwner::Release(1));
        let config = config(true);
        let tunnels = TunnelReconciler::new(&edge, &config, &recorder);

        tunnels.ensure("shop-staging", &rules()).unwrap();
        assert_eq!(edge.create_calls("worker_route"), 1);
        assert!(edge.worker("banner").is_some());

        let hosts = vec!["app.example.com".to_string()];
        tunnels.teardown("shop-staging", &hosts).unwrap();
        tunnels.teardown("shop-staging", &hosts).unwrap();
        assert_eq!(
            edge.deletions(),
            vec![
                "worker_route:app.example.com/*",
                "dns_record:app.example.com",
                "tunnel:shop-staging",
            ]
        );
        assert!(edge.is_empty());
    }
}
