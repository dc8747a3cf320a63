//! Priority tiers and memory/CPU profiles per workload type.
//!
//! Eviction under memory pressure removes the lowest tier first:
//! application workloads, then platform services, and database workloads
//! effectively never.
//!
//! Profiles carry a memory request and limit plus a CPU request. There is no
//! CPU limit field: throttling is invisible, an out-of-memory kill is not, and
//! a CPU request alone already gives fair scheduling weight.

use serde::{Deserialize, Serialize};

/// Node memory the built-in profiles are sized for.
pub const BASELINE_NODE_MEMORY_MIB: u64 = 8 * 1024;

/// Workload category used to pick a profile and a priority tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadType {
    Database,
    Platform,
    Small,
    Medium,
    Large,
}

impl WorkloadType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadType::Database => "database",
            WorkloadType::Platform => "platform",
            WorkloadType::Small => "small",
            WorkloadType::Medium => "medium",
            WorkloadType::Large => "large",
        }
    }
}

/// Priority tier, in eviction order (last evicted first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PriorityTier {
    DatabaseCritical,
    Platform,
    App,
}

impl PriorityTier {
    pub const ALL: [PriorityTier; 3] = [
        PriorityTier::DatabaseCritical,
        PriorityTier::Platform,
        PriorityTier::App,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            PriorityTier::DatabaseCritical => "berth-database-critical",
            PriorityTier::Platform => "berth-platform",
            PriorityTier::App => "berth-app",
        }
    }

    /// Scheduler priority value. The database tier sits at the highest
    /// value a user-defined class may take.
    pub fn value(&self) -> i64 {
        match self {
            PriorityTier::DatabaseCritical => 1_000_000_000,
            PriorityTier::Platform => 100_000,
            PriorityTier::App => 1_000,
        }
    }

    /// Only the app tier applies to pods that name no class.
    pub fn global_default(&self) -> bool {
        matches!(self, PriorityTier::App)
    }

    pub fn description(&self) -> &'static str {
        match self {
            PriorityTier::DatabaseCritical => "Stateful databases; evicted last",
            PriorityTier::Platform => "Platform services such as caches and the registry",
            PriorityTier::App => "Application processes; default tier",
        }
    }

    pub fn for_workload(workload: WorkloadType) -> Self {
        match workload {
            WorkloadType::Database => PriorityTier::DatabaseCritical,
            WorkloadType::Platform => PriorityTier::Platform,
            _ => PriorityTier::App,
        }
    }
}

/// Map a workload type name to its priority class name.
pub fn priority_class_for(workload: &str) -> &'static str {
    match workload {
        "database" => PriorityTier::DatabaseCritical.name(),
        "platform" => PriorityTier::Platform.name(),
        _ => PriorityTier::App.name(),
    }
}

/// Memory request/limit and CPU request for one container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceProfile {
    pub memory_request_mib: u64,
    pub memory_limit_mib: u64,
    pub cpu_request_millis: u32,
}

impl ResourceProfile {
    pub fn memory_request(&self) -> String {
        format!("{}Mi", self.memory_request_mib)
    }

    pub fn memory_limit(&self) -> String {
        format!("{}Mi", self.memory_limit_mib)
    }

    pub fn cpu_request(&self) -> String {
        format!("{}m", self.cpu_request_millis)
    }
}

const PROFILES: [(WorkloadType, ResourceProfile); 5] = [
    (
        WorkloadType::Database,
        ResourceProfile {
            memory_request_mib: 512,
            memory_limit_mib: 2048,
            cpu_request_millis: 250,
        },
    ),
    (
        WorkloadType::Platform,
        ResourceProfile {
            memory_request_mib: 128,
            memory_limit_mib: 512,
            cpu_request_millis: 100,
        },
    ),
    (
        WorkloadType::Small,
        ResourceProfile {
            memory_request_mib: 256,
            memory_limit_mib: 512,
            cpu_request_millis: 100,
        },
    ),
    (
        WorkloadType::Medium,
        ResourceProfile {
            memory_request_mib: 512,
            memory_limit_mib: 1024,
            cpu_request_millis: 250,
        },
    ),
    (
        WorkloadType::Large,
        ResourceProfile {
            memory_request_mib: 1024,
            memory_limit_mib: 2048,
            cpu_request_millis: 500,
        },
    ),
];

/// Profile for `workload`. Returned by value; callers may adjust it freely.
pub fn profile_for(workload: WorkloadType) -> ResourceProfile {
    PROFILES
        .iter()
        .find(|(w, _)| *w == workload)
        .map(|(_, p)| *p)
        .unwrap_or(PROFILES[2].1)
}

/// Raise burst limits on nodes with materially more memory than the baseline.
///
/// Nodes below 1.5× the baseline keep the profile unchanged. Above that the
/// memory limit scales with the node, rounded down to 64 MiB. Requests stay
/// put so scheduling weight is unaffected.
pub fn auto_size(profile: ResourceProfile, node_memory_mib: u64) -> ResourceProfile {
    if node_memory_mib * 2 < BASELINE_NODE_MEMORY_MIB * 3 {
        return profile;
    }
    let scaled = profile.memory_limit_mib * node_memory_mib / BASELINE_NODE_MEMORY_MIB;
    ResourceProfile {
        memory_limit_mib: (scaled / 64 * 64).max(profile.memory_limit_mib),
        ..profile
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_ordering() {
        assert!(PriorityTier::DatabaseCritical.value() > PriorityTier::Platform.value());
        assert!(PriorityTier::Platform.value() > PriorityTier::App.value());
    }

    #[test]
    fn only_app_tier_is_global_default() {
        let defaults: Vec<_> = PriorityTier::ALL
            .iter()
            .filter(|t| t.global_default())
            .collect();
        assert_eq!(defaults, vec![&PriorityTier::App]);
    }

    #[test]
    fn class_mapping() {
        assert_eq!(priority_class_for("database"), "berth-database-critical");
        assert_eq!(priority_class_for("platform"), "berth-platform");
        assert_eq!(priority_class_for("medium"), "berth-app");
        assert_eq!(priority_class_for("anything"), "berth-app");
        assert_eq!(
            PriorityTier::for_workload(WorkloadType::Large).name(),
            "berth-app"
        );
    }

    #[test]
    fn profile_is_a_copy() {
        let mut profile = profile_for(WorkloadType::Database);
        profile.memory_limit_mib = 1;
        assert_eq!(profile_for(WorkloadType::Database).memory_limit_mib, 2048);
    }

    #[test]
    fn every_profile_requests_less_than_its_limit() {
        for (_, p) in PROFILES {
            assert!(p.memory_request_mib <= p.memory_limit_mib);
            assert!(p.cpu_request_millis > 0);
        }
    }

    #[test]
    fn auto_size_leaves_baseline_alone() {
        let base = profile_for(WorkloadType::Medium);
        assert_eq!(auto_size(base, 4 * 1024), base);
        assert_eq!(auto_size(base, 8 * 1024), base);
        assert_eq!(auto_size(base, 11 * 1024), base);
    }

    #[test]
    fn auto_size_scales_large_nodes() {
        let base = profile_for(WorkloadType::Medium);
        let sized = auto_size(base, 16 * 1024);
        assert_eq!(sized.memory_limit_mib, 2048);
        assert_eq!(sized.memory_request_mib, base.memory_request_mib);
        assert_eq!(sized.cpu_request_millis, base.cpu_request_millis);
    }

    #[test]
    fn quantity_strings() {
        let p = profile_for(WorkloadType::Small);
        assert_eq!(p.memory_request(), "256Mi");
        assert_eq!(p.memory_limit(), "512Mi");
        assert_eq!(p.cpu_request(), "100m");
    }
}
