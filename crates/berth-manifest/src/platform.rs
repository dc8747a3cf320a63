//! Cluster-wide objects installed once per server: priority classes and the
//! in-cluster image registry.

use serde_json::json;

use berth_core::policy::profile_for;
use berth_core::{PriorityTier, WorkloadType};

use crate::kube::ManifestSet;
use crate::labels::{metadata, selector};

pub const SYSTEM_NAMESPACE: &str = "berth-system";
pub const REGISTRY_NAME: &str = "registry";
pub const REGISTRY_IMAGE: &str = "registry:2";
pub const REGISTRY_PORT: u16 = 5000;
pub const REGISTRY_NODE_PORT: u16 = 30500;
pub const INGRESS_HTTP_NODE_PORT: u16 = 30080;
pub const INGRESS_HTTPS_NODE_PORT: u16 = 30443;
pub const INGRESS_NGINX_MANIFEST: &str = "https://raw.githubusercontent.com/kubernetes/ingress-nginx/controller-v1.11.2/deploy/static/provider/baremetal/deploy.yaml";
pub const INGRESS_NAMESPACE: &str = "ingress-nginx";
pub const INGRESS_CONTROLLER_SERVICE: &str = "ingress-nginx-controller";

/// Registry address as seen from the node and its container runtimes.
pub fn registry_address(node_ip: &str) -> String {
    format!("{node_ip}:{REGISTRY_NODE_PORT}")
}

pub fn priority_classes() -> ManifestSet {
    let mut set = ManifestSet::new();
    for tier in PriorityTier::ALL {
        set.push(json!({
            "apiVersion": "scheduling.k8s.io/v1",
            "kind": "PriorityClass",
            "metadata": { "name": tier.name() },
            "value": tier.value(),
            "globalDefault": tier.global_default(),
            "description": tier.description(),
        }));
    }
    set
}

/// Registry Deployment backed by a hostPath, exposed on a fixed NodePort.
pub fn registry(storage_path: &str) -> ManifestSet {
    let profile = profile_for(WorkloadType::Platform);
    let mut deployment_meta = metadata(REGISTRY_NAME, SYSTEM_NAMESPACE, REGISTRY_NAME);
    deployment_meta["namespace"] = json!(SYSTEM_NAMESPACE);
    let service_meta = deployment_meta.clone();

    let mut set = ManifestSet::new();
    set.push(json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": { "name": SYSTEM_NAMESPACE },
    }));
    set.push(json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": deployment_meta,
        "spec": {
            "replicas": 1,
            "strategy": { "type": "Recreate" },
            "selector": { "matchLabels": selector(SYSTEM_NAMESPACE, REGISTRY_NAME) },
            "template": {
                "metadata": { "labels": crate::labels::labels(SYSTEM_NAMESPACE, REGISTRY_NAME) },
                "spec": {
                    "priorityClassName": PriorityTier::Platform.name(),
                    "containers": [{
                        "name": REGISTRY_NAME,
                        "image": REGISTRY_IMAGE,
                        "env": [{ "name": "REGISTRY_STORAGE_DELETE_ENABLED", "value": "true" }],
                        "ports": [{ "containerPort": REGISTRY_PORT }],
                        "resources": {
                            "requests": {
                                "memory": profile.memory_request(),
                                "cpu": profile.cpu_request(),
                            },
                            "limits": { "memory": profile.memory_limit() },
                        },
                        "volumeMounts": [{ "name": "data", "mountPath": "/var/lib/registry" }],
                    }],
                    "volumes": [{
                        "name": "data",
                        "hostPath": { "path": storage_path, "type": "DirectoryOrCreate" },
                    }],
                },
            },
        },
    }));
    set.push(json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": service_meta,
        "spec": {
            "type": "NodePort",
            "selector": selector(SYSTEM_NAMESPACE, REGISTRY_NAME),
            "ports": [{
                "port": REGISTRY_PORT,
                "targetPort": REGISTRY_PORT,
                "nodePort": REGISTRY_NODE_PORT,
            }],
        },
    }));
    set
}

/// Strategic-merge patch pinning the ingress controller's NodePorts.
pub fn ingress_node_port_patch() -> serde_json::Value {
    json!({
        "spec": {
            "type": "NodePort",
            "ports": [
                { "name": "http", "port": 80, "nodePort": INGRESS_HTTP_NODE_PORT },
                { "name": "https", "port": 443, "nodePort": INGRESS_HTTPS_NODE_PORT },
            ],
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_classes_have_one_global_default() {
        let set = priority_classes();
        assert_eq!(set.count("PriorityClass"), 3);
        let defaults: Vec<_> = set
            .documents()
            .iter()
            .filter(|d| d["globalDefault"] == true)
            .map(|d| d["metadata"]["name"].clone())
            .collect();
        assert_eq!(defaults, vec![json!("berth-app")]);
        let db = set.find("PriorityClass", "berth-database-critical").unwrap();
        assert_eq!(db["value"], 1_000_000_000);
    }

    #[test]
    fn registry_is_exposed_on_fixed_node_port() {
        let set = registry("/var/lib/berth/registry");
        let service = set.find("Service", REGISTRY_NAME).unwrap();
        assert_eq!(service["spec"]["ports"][0]["nodePort"], 30500);
        assert_eq!(service["metadata"]["namespace"], SYSTEM_NAMESPACE);
        let deploy = set.find("Deployment", REGISTRY_NAME).unwrap();
        assert_eq!(
            deploy["spec"]["template"]["spec"]["volumes"][0]["hostPath"]["path"],
            "/var/lib/berth/registry"
        );
        assert_eq!(registry_address("10.0.0.2"), "10.0.0.2:30500");
    }
}
