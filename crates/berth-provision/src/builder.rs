//! Image builds on the server's own docker daemon.
//!
//! Each build is tagged `<registry>/<repository>:<timestamp>` and `:latest`,
//! both pushed to the in-cluster registry. `latest` is also the cache source
//! of the next build. Older timestamp tags beyond the newest `keep` are
//! removed locally and from the registry. A registry manifest is deleted only
//! when no kept tag points at the same digest.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use berth_exec::shell::quote;
use berth_exec::{ExecOptions, RemoteRunner};
use berth_state::ExecutionTag;
use chrono::Utc;
use tracing::{info, warn};

use crate::error::ProvisionResult;

pub const LATEST: &str = "latest";
const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

#[derive(Debug, Clone)]
pub struct BuildRequest<'a> {
    /// Registry `host:port`.
    pub registry: &'a str,
    /// Image repository inside the registry.
    pub repository: &'a str,
    /// Checkout directory on the server.
    pub workdir: &'a str,
    pub dockerfile: &'a str,
    pub context: &'a str,
    pub build_args: BTreeMap<String, String>,
    pub keep: usize,
}

impl BuildRequest<'_> {
    pub fn image(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }
}

pub struct DockerBuilder<'a> {
    runner: &'a RemoteRunner,
    timeout: Duration,
}

impl<'a> DockerBuilder<'a> {
    pub fn new(runner: &'a RemoteRunner, timeout: Duration) -> Self {
        Self { runner, timeout }
    }

    /// Build, push and prune. Returns the timestamped image reference.
    pub fn build_and_push(&self, request: &BuildRequest<'_>) -> ProvisionResult<String> {
        let tag = Utc::now().format(TIMESTAMP_FORMAT).to_string();
        let image = request.image();
        let versioned = format!("{image}:{tag}");
        let latest = format!("{image}:{LATEST}");

        self.runner.execute(
            &build_command(request, &versioned, &latest),
            ExecOptions::tagged(ExecutionTag::ImageBuild).timeout(self.timeout),
        )?;
        for reference in [&versioned, &latest] {
            self.runner.execute(
                &format!("docker push {}", quote(reference)),
                ExecOptions::tagged(ExecutionTag::ImagePush).timeout(self.timeout),
            )?;
        }
        info!(image = %versioned, "image pushed");

        self.prune(request)?;
        Ok(versioned)
    }

    fn prune(&self, request: &BuildRequest<'_>) -> ProvisionResult<()> {
        let image = request.image();

        let local = self.runner.run(
            &format!("docker images {} --format '{{{{.Tag}}}}'", quote(&image)),
            ExecutionTag::ImagePrune,
        )?;
        let stale = tags_to_prune(local.stdout.lines(), request.keep);
        if !stale.is_empty() {
            let references: Vec<String> = stale.iter().map(|t| quote(&format!("{image}:{t}"))).collect();
            self.runner.execute(
                &format!("docker rmi {}", references.join(" ")),
                ExecOptions::tagged(ExecutionTag::ImagePrune).allow_failure(),
            )?;
        }

        let listing = self.runner.execute(
            &format!(
                "curl -fsS http://{}/v2/{}/tags/list",
                request.registry, request.repository
            ),
            ExecOptions::tagged(ExecutionTag::ImagePrune).allow_failure(),
        )?;
        if !listing.success() {
            warn!(image = %image, "cannot list registry tags; skipping registry prune");
            return Ok(());
        }
        let tags = registry_tags(&listing.stdout);
        let stale = tags_to_prune(tags.iter().map(String::as_str), request.keep);
        if stale.is_empty() {
            return Ok(());
        }

        let resolved = self.runner.execute(
            &registry_digests_command(request.registry, request.repository, &tags),
            ExecOptions::tagged(ExecutionTag::ImagePrune).allow_failure(),
        )?;
        let digests = parse_digests(&resolved.stdout);
        let Some(doomed) = digests_to_delete(&tags, &stale, &digests) else {
            warn!(image = %image, "cannot resolve digests of kept tags; skipping registry prune");
            return Ok(());
        };
        for digest in doomed {
            self.runner.execute(
                &registry_delete_command(request.registry, request.repository, &digest),
                ExecOptions::tagged(ExecutionTag::ImagePrune).allow_failure(),
            )?;
        }
        Ok(())
    }
}

fn build_command(request: &BuildRequest<'_>, versioned: &str, latest: &str) -> String {
    let mut args = vec![
        "docker build".to_string(),
        format!("-f {}", quote(request.dockerfile)),
        format!("-t {}", quote(versioned)),
        format!("-t {}", quote(latest)),
        format!("--cache-from {}", quote(latest)),
    ];
    for (key, value) in &request.build_args {
        args.push(format!("--build-arg {}", quote(&format!("{key}={value}"))));
    }
    args.push(quote(request.context));
    format!(
        "cd {} && (docker pull {} || true) && {}",
        quote(request.workdir),
        quote(latest),
        args.join(" ")
    )
}

/// Timestamp tags beyond the newest `keep`, oldest last. `latest` and
/// anything that is not a build timestamp are never pruned.
pub fn tags_to_prune<'t>(tags: impl IntoIterator<Item = &'t str>, keep: usize) -> Vec<String> {
    let mut builds: Vec<&str> = tags
        .into_iter()
        .map(str::trim)
        .filter(|t| t.len() == 14 && t.bytes().all(|b| b.is_ascii_digit()))
        .collect();
    builds.sort_unstable_by(|a, b| b.cmp(a));
    builds.dedup();
    builds.into_iter().skip(keep).map(str::to_string).collect()
}

/// Tags from a registry `tags/list` response.
pub fn registry_tags(body: &str) -> Vec<String> {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v["tags"].as_array().map(|tags| {
                tags.iter()
                    .filter_map(|t| t.as_str().map(str::to_string))
                    .collect()
            })
        })
        .unwrap_or_default()
}

/// Print `<tag> <digest>` for every tag; the digest is empty when the
/// registry does not answer for that tag.
pub fn registry_digests_command(registry: &str, repository: &str, tags: &[String]) -> String {
    let base = format!("http://{registry}/v2/{repository}/manifests");
    let tags: Vec<String> = tags.iter().map(|t| quote(t)).collect();
    format!(
        "for tag in {}; do digest=$(curl -fsSI \
         -H 'Accept: application/vnd.docker.distribution.manifest.v2+json' \
         {base}/$tag | awk 'tolower($1) == \"docker-content-digest:\" {{print $2}}' | tr -d '\\r'); \
         echo \"$tag $digest\"; done",
        tags.join(" ")
    )
}

/// Tag to digest map from [`registry_digests_command`] output.
pub fn parse_digests(output: &str) -> BTreeMap<String, String> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let tag = fields.next()?;
            let digest = fields.next()?;
            Some((tag.to_string(), digest.to_string()))
        })
        .collect()
}

/// Digests referenced only by `stale` tags. `None` when a kept tag has no
/// known digest, since deleting could then hit a manifest still in use.
pub fn digests_to_delete(
    tags: &[String],
    stale: &[String],
    digests: &BTreeMap<String, String>,
) -> Option<Vec<String>> {
    let mut kept = BTreeSet::new();
    for tag in tags.iter().filter(|t| !stale.contains(t)) {
        kept.insert(digests.get(tag)?.as_str());
    }
    let doomed: BTreeSet<&str> = stale
        .iter()
        .filter_map(|tag| digests.get(tag).map(String::as_str))
        .filter(|digest| !kept.contains(digest))
        .collect();
    Some(doomed.into_iter().map(str::to_string).collect())
}

/// Delete the manifest `digest` from the registry.
pub fn registry_delete_command(registry: &str, repository: &str, digest: &str) -> String {
    format!(
        "curl -fsS -X DELETE http://{registry}/v2/{repository}/manifests/{}",
        quote(digest)
    )
}
