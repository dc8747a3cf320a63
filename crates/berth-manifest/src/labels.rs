//! Standard labels stamped on every cluster object.

use std::collections::BTreeMap;

use serde_json::{Value, json};

pub const NAME: &str = "app.kubernetes.io/name";
pub const INSTANCE: &str = "app.kubernetes.io/instance";
pub const MANAGED_BY: &str = "app.kubernetes.io/managed-by";
pub const MANAGER: &str = "berth";

/// Full label set for `component` of the deployment identified by `prefix`.
pub fn labels(prefix: &str, component: &str) -> BTreeMap<String, String> {
    let mut labels = selector(prefix, component);
    labels.insert(MANAGED_BY.to_string(), MANAGER.to_string());
    labels
}

/// The subset used in selectors. Must stay stable across deploys.
pub fn selector(prefix: &str, component: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (NAME.to_string(), component.to_string()),
        (INSTANCE.to_string(), prefix.to_string()),
    ])
}

pub fn metadata(name: &str, prefix: &str, component: &str) -> Value {
    json!({
        "name": name,
        "labels": labels(prefix, component),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_is_subset_of_labels() {
        let all = labels("shop-staging", "web");
        for (k, v) in selector("shop-staging", "web") {
            assert_eq!(all.get(&k), Some(&v));
        }
        assert_eq!(all[MANAGED_BY], "berth");
        assert_eq!(all[INSTANCE], "shop-staging");
    }
}
