//! Deterministic, length-capped build and image names (component A).
//!
//! Two pure functions, no I/O. Grounded on the original `_generate_build_name`
//! in `binderhub/builder.py`, reworked to fail construction instead of
//! silently truncating into an invalid name when the budget doesn't fit.

use sha2::{Digest, Sha256};
use thiserror::Error;

pub const DEFAULT_LIMIT: usize = 63;
pub const DEFAULT_HASH_LEN: usize = 6;
pub const DEFAULT_REF_LEN: usize = 6;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("name limit {limit} too small for hash_len {hash_len} + ref_len {ref_len} + 2")]
pub struct LimitTooSmall {
    pub limit: usize,
    pub hash_len: usize,
    pub ref_len: usize,
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

fn take_chars(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Build a unique, `<=limit`-character build name for (slug, ref).
///
/// Guaranteed (to an acceptable probability) to be unique for a given
/// slug/ref pair: the hash component disambiguates slugs that share a
/// truncated prefix, and the ref prefix disambiguates refs of one slug.
pub fn build_name(slug: &str, git_ref: &str) -> Result<String, LimitTooSmall> {
    build_name_with(slug, git_ref, DEFAULT_LIMIT, DEFAULT_HASH_LEN, DEFAULT_REF_LEN)
}

pub fn build_name_with(
    slug: &str,
    git_ref: &str,
    limit: usize,
    hash_len: usize,
    ref_len: usize,
) -> Result<String, LimitTooSmall> {
    if limit < hash_len + ref_len + 2 {
        return Err(LimitTooSmall { limit, hash_len, ref_len });
    }

    let mut hasher = Sha256::new();
    hasher.update(slug.as_bytes());
    let digest_hex = hex_encode(&hasher.finalize());
    let hash = take_chars(&digest_hex, hash_len);

    let prefix_len = limit - hash_len - ref_len - 2;
    let prefix = take_chars(slug, prefix_len);
    let ref_part = take_chars(git_ref, ref_len);

    let name = format!("{prefix}-{hash}-{ref_part}");
    Ok(name.to_lowercase().replace('_', "-"))
}

/// Build a fully-qualified `registry/repo:tag` image reference.
///
/// `prefix` must be non-empty and already include the registry host; this
/// function does not validate it (inputs are validated upstream, per
/// spec §4.A).
pub fn image_name(prefix: &str, slug: &str, git_ref: &str) -> String {
    format!("{prefix}{slug}:{git_ref}").to_lowercase().replace('_', "-")
}

const USERNAME_SUFFIX_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const USERNAME_SUFFIX_LENGTH: usize = 8;

/// Extracts the path portion of a repo URL the way the original
/// `username_from_repo` does: an scp-like ssh remote (`user@host:path`,
/// no `://`) splits on the first `:`; anything else is treated as a URL
/// and only the path after the host is kept.
fn repo_path(repo: &str) -> String {
    let has_scheme = repo.contains("://");
    let looks_scp_like = !has_scheme && repo.contains('@') && repo.contains(':');
    if looks_scp_like {
        return repo.splitn(2, ':').nth(1).unwrap_or("").to_string();
    }
    if has_scheme {
        let after_scheme = repo.splitn(2, "://").nth(1).unwrap_or("");
        return match after_scheme.find('/') {
            Some(idx) => after_scheme[idx..].to_string(),
            None => String::new(),
        };
    }
    repo.to_string()
}

/// Generates a random lowercase-alphanumeric suffix to disambiguate users
/// launching the same image concurrently (spec §8 invariant 4).
fn random_username_suffix() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    (0..USERNAME_SUFFIX_LENGTH)
        .map(|_| USERNAME_SUFFIX_CHARS[rng.gen_range(0..USERNAME_SUFFIX_CHARS.len())] as char)
        .collect()
}

/// Derives a hub username for a git repo url, e.g.
/// `minrk-binder-example-abc123de` from
/// `https://github.com/minrk/binder-example.git` — grounded on
/// `username_from_repo` in `original_source/binderhub/launcher.py`
/// (the source's stray bare `print` statement is dropped, see §9).
pub fn username_from_repo(repo: &str) -> String {
    let path = repo_path(repo);
    let mut prefix = path.trim_matches('/').replace('/', "-").to_lowercase();
    if let Some(stripped) = prefix.strip_suffix(".git") {
        prefix = stripped.to_string();
    }
    if prefix.chars().count() > 32 {
        let head = take_chars(&prefix, 15).to_string();
        let tail_start = prefix.chars().count() - 15;
        let tail: String = prefix.chars().skip(tail_start).collect();
        prefix = format!("{head}-{tail}");
    }
    format!("{prefix}-{}", random_username_suffix())
}

/// Matches `[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*` —
/// used only by tests to check invariant 1 of spec §8; production code never
/// needs to validate a name it just generated.
#[cfg(test)]
pub(crate) fn is_valid_dns_label(s: &str) -> bool {
    if s.is_empty() || s.len() > 253 {
        return false;
    }
    s.split('.').all(|label| {
        if label.is_empty() {
            return false;
        }
        let bytes = label.as_bytes();
        let alnum = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
        alnum(bytes[0])
            && alnum(bytes[bytes.len() - 1])
            && bytes.iter().all(|&b| alnum(b) || b == b'-')
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_and_bounded() {
        let a = build_name("my-org-my-repo", "abcdef1234567890").unwrap();
        let b = build_name("my-org-my-repo", "abcdef1234567890").unwrap();
        assert_eq!(a, b);
        assert!(a.len() <= DEFAULT_LIMIT);
        assert!(is_valid_dns_label(&a), "{a} is not a valid dns label");
    }

    #[test]
    fn changes_with_slug_or_ref() {
        let base = build_name("repo-a", "ref1").unwrap();
        let diff_slug = build_name("repo-b", "ref1").unwrap();
        let diff_ref = build_name("repo-a", "ref2").unwrap();
        assert_ne!(base, diff_slug);
        assert_ne!(base, diff_ref);
    }

    #[test]
    fn long_slug_is_truncated_not_panicking() {
        let long_slug = "a".repeat(200);
        let name = build_name(&long_slug, "deadbeefcafe").unwrap();
        assert!(name.len() <= DEFAULT_LIMIT);
    }

    #[test]
    fn rejects_limit_too_small() {
        let err = build_name_with("slug", "ref", 10, 6, 6).unwrap_err();
        assert_eq!(err, LimitTooSmall { limit: 10, hash_len: 6, ref_len: 6 });
    }

    #[test]
    fn image_name_has_no_underscores() {
        let name = image_name("registry.example.com/", "my_org/my_repo", "ab_cd");
        assert!(!name.contains('_'));
        assert_eq!(name, "registry.example.com/my-org/my-repo:ab-cd");
    }

    #[test]
    fn same_inputs_are_byte_identical_across_calls() {
        for _ in 0..50 {
            assert_eq!(
                build_name("stable-slug", "stable-ref").unwrap(),
                build_name("stable-slug", "stable-ref").unwrap()
            );
        }
    }

    #[test]
    fn username_from_https_repo_has_expected_prefix() {
        let name = username_from_repo("https://github.com/a/b.git");
        let (prefix, suffix) = name.rsplit_once('-').unwrap();
        assert_eq!(prefix, "a-b");
        assert_eq!(suffix.len(), USERNAME_SUFFIX_LENGTH);
        assert!(suffix.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn username_from_long_path_truncates_to_head_and_tail() {
        let long_path = format!("https://example.com/{}/{}.git", "a".repeat(20), "b".repeat(20));
        let name = username_from_repo(&long_path);
        let parts: Vec<&str> = name.rsplitn(2, '-').collect();
        let suffix = parts[0];
        let prefix = parts[1];
        assert_eq!(suffix.len(), USERNAME_SUFFIX_LENGTH);
        // head(15) + "-" + tail(15), always 31 chars regardless of input length.
        assert_eq!(prefix.len(), 31, "expected head+tail truncated prefix, got {prefix}");
        assert!(prefix.starts_with(&"a".repeat(15)));
        assert!(prefix.ends_with(&"b".repeat(15)));
    }

    #[test]
    fn username_suffix_varies_across_calls() {
        let a = username_from_repo("https://github.com/a/b.git");
        let b = username_from_repo("https://github.com/a/b.git");
        assert_ne!(a, b, "random suffix should (almost always) differ");
    }
}
