//! Application environment: configured values plus derived connection strings.

use std::collections::BTreeMap;

use berth_core::env::resolve_map;
use berth_core::{BerthConfig, Target};

use crate::error::{ManifestError, ManifestResult};

pub const DATABASE_URL: &str = "DATABASE_URL";

/// Resolve the configured env for `target` and add `DATABASE_URL` (first
/// database), `<KIND>_URL` per database and `<NAME>_URL` per service with a
/// port. `host` maps a database kind or service name to its network address.
/// Derived values win over configured ones of the same key.
pub fn app_env<H>(
    config: &BerthConfig,
    target: Target,
    passwords: &BTreeMap<String, String>,
    host: H,
) -> ManifestResult<BTreeMap<String, String>>
where
    H: Fn(&str) -> String,
{
    let mut env = resolve_map(&config.env, target);

    for (index, db) in config.databases.iter().enumerate() {
        let kind = db.kind.name();
        let password = passwords
            .get(kind)
            .ok_or_else(|| ManifestError::MissingPassword(kind.to_string()))?;
        let url = db.kind.url(&host(kind), password);
        if index == 0 {
            env.insert(DATABASE_URL.to_string(), url.clone());
        }
        env.insert(db.kind.url_env_key(), url);
    }

    for service in &config.services {
        if let Some(url) = service.url(&host(&service.name)) {
            env.insert(service.url_env_key(), url);
        }
    }

    Ok(env)
}

/// `KEY=value` lines for a dotenv file, sorted by key.
pub fn dotenv(env: &BTreeMap<String, String>) -> String {
    env.iter()
        .map(|(k, v)| format!("{k}={}\n", quote(v)))
        .collect()
}

fn quote(value: &str) -> String {
    if value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_./:@%+=,".contains(c))
    {
        value.to_string()
    } else {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use berth_core::{DatabaseConfig, DatabaseKind, EnvValue, ServiceConfig};

    fn config() -> BerthConfig {
        BerthConfig::builder("shop")
            .database(DatabaseConfig::postgres())
            .database(DatabaseConfig::new(DatabaseKind::Mysql))
            .service(ServiceConfig::new("redis", "redis:7").port(6379).url_scheme("redis"))
            .env(
                "RAILS_ENV",
                EnvValue::per_target([
                    ("sandbox", "development".to_string()),
                    ("release", "production".to_string()),
                ]),
            )
            .build()
            .unwrap()
    }

    fn passwords() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("postgres".to_string(), "pg".to_string()),
            ("mysql".to_string(), "my".to_string()),
        ])
    }

    #[test]
    fn derives_urls_from_hosts() {
        let env = app_env(&config(), Target::Release, &passwords(), |name| {
            format!("shop-staging-{name}")
        })
        .unwrap();

        assert_eq!(env["RAILS_ENV"], "production");
        assert_eq!(
            env[DATABASE_URL],
            "postgresql://app:pg@shop-staging-postgres:5432/app"
        );
        assert_eq!(env["POSTGRES_URL"], env[DATABASE_URL]);
        assert_eq!(env["MYSQL_URL"], "mysql://app:my@shop-staging-mysql:3306/app");
        assert_eq!(env["REDIS_URL"], "redis://shop-staging-redis:6379");
    }

    #[test]
    fn missing_password_is_an_error() {
        let err = app_env(&config(), Target::Sandbox, &BTreeMap::new(), str::to_string).unwrap_err();
        assert!(matches!(err, ManifestError::MissingPassword(kind) if kind == "postgres"));
    }

    #[test]
    fn dotenv_quotes_when_needed() {
        let env = BTreeMap::from([
            ("A".to_string(), "plain".to_string()),
            ("B".to_string(), "two words".to_string()),
        ]);
        assert_eq!(dotenv(&env), "A=plain\nB=\"two words\"\n");
    }
}
