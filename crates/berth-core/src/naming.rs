//! Deterministic naming scheme.
//!
//! Every cloud resource, branch and hostname is derived from the owner's
//! prefix. Nothing provider-assigned is needed to find a resource again.

use rand::RngCore;

/// Length of a sandbox slug in hex characters.
pub const SLUG_LEN: usize = 6;

/// Generate a fresh sandbox slug (6 lowercase hex characters).
pub fn generate_slug() -> String {
    let mut bytes = [0u8; SLUG_LEN / 2];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Whether `slug` has the shape produced by [`generate_slug`].
pub fn is_valid_slug(slug: &str) -> bool {
    slug.len() == SLUG_LEN && slug.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Random hex secret of `bytes` bytes (access tokens, database passwords).
pub fn generate_secret(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

/// Lowercase DNS label: 1–63 chars of `[a-z0-9-]`, not starting or ending with `-`.
pub fn is_dns_label(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= 63
        && !value.starts_with('-')
        && !value.ends_with('-')
        && value
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

/// Lowercase `value` and replace anything outside `[a-z0-9]` with `-`.
pub fn sanitize(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_matches('-').to_string()
}

/// Resource prefix for a sandbox.
pub fn sandbox_prefix(app_name: &str, slug: &str) -> String {
    format!("{}-{slug}", sanitize(app_name))
}

/// Resource prefix for a release environment.
pub fn release_prefix(app_name: &str, environment: &str) -> String {
    format!("{}-{}", sanitize(app_name), sanitize(environment))
}

/// Name of a resource belonging to `prefix`.
pub fn resource_name(prefix: &str, resource: &str) -> String {
    format!("{prefix}-{resource}")
}

/// Git branch a sandbox works on.
pub fn sandbox_branch(slug: &str) -> String {
    format!("sandbox/{slug}")
}

/// Public hostname of a sandbox.
pub fn sandbox_hostname(slug: &str, zone: &str) -> String {
    format!("{slug}.{zone}")
}

/// Public hostname for a subdomain.
pub fn hostname(subdomain: &str, zone: &str) -> String {
    format!("{subdomain}.{zone}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_shape() {
        for _ in 0..32 {
            let slug = generate_slug();
            assert!(is_valid_slug(&slug), "bad slug {slug}");
        }
        assert!(!is_valid_slug("ABCDEF"));
        assert!(!is_valid_slug("abc"));
    }

    #[test]
    fn prefixes_are_deterministic() {
        assert_eq!(release_prefix("shop", "staging"), "shop-staging");
        assert_eq!(release_prefix("Shop", "Prod EU"), "shop-prod-eu");
        assert_eq!(sandbox_prefix("shop", "a1b2c3"), "shop-a1b2c3");
        assert_eq!(resource_name("shop-staging", "postgres"), "shop-staging-postgres");
    }

    #[test]
    fn dns_labels() {
        assert!(is_dns_label("web"));
        assert!(is_dns_label("shop-2"));
        assert!(!is_dns_label("-web"));
        assert!(!is_dns_label("Web"));
        assert!(!is_dns_label(""));
    }

    #[test]
    fn secrets_are_hex() {
        let secret = generate_secret(16);
        assert_eq!(secret.len(), 32);
        assert!(secret.bytes().all(|b| b.is_ascii_hexdigit()));
    }
}
