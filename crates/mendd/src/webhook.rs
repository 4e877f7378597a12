//! Repository webhook intake: signature verification and payload
//! extraction.
//!
//! The body is the provider's native push/PR payload; the core extracts
//! the repository URL and changed paths and ignores the rest. Signatures
//! are HMAC-SHA256 over the raw body, hex-encoded in `X-Signature`, keyed
//! by the tenant secret; verification is constant-time.

use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Verify an `X-Signature` header against the raw body.
pub fn verify_signature(secret: &str, body: &[u8], signature_hex: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex.trim().trim_start_matches("sha256=")) else {
        return false;
    };
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Compute the hex signature for a body (used by tests and the CLI).
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// The fields the core requires from a webhook payload.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookEvent {
    pub repo_url: String,
    pub default_branch: Option<String>,
    pub changed_paths: Vec<String>,
    /// Pull-request events get retry advice under backpressure; pushes
    /// are always absorbed.
    pub is_pull_request: bool,
}

/// Extract the minimal contract from a provider payload.
///
/// Understands the common shapes: push payloads with `commits[].added/
/// modified/removed`, PR payloads with `pull_request` and a changed-file
/// list, and a flat `changed_files` fallback. Returns `None` when no
/// repository URL can be found.
pub fn extract_event(payload: &Value) -> Option<WebhookEvent> {
    let repo = payload.get("repository")?;
    let repo_url = repo
        .get("clone_url")
        .or_else(|| repo.get("html_url"))
        .or_else(|| repo.get("url"))
        .and_then(Value::as_str)?
        .to_string();
    let default_branch = repo
        .get("default_branch")
        .and_then(Value::as_str)
        .map(String::from);

    let mut changed_paths: Vec<String> = Vec::new();
    let mut push_paths = |value: Option<&Value>| {
        if let Some(list) = value.and_then(Value::as_array) {
            for path in list.iter().filter_map(Value::as_str) {
                if !changed_paths.iter().any(|p| p == path) {
                    changed_paths.push(path.to_string());
                }
            }
        }
    };

    if let Some(commits) = payload.get("commits").and_then(Value::as_array) {
        for commit in commits {
            push_paths(commit.get("added"));
            push_paths(commit.get("modified"));
            push_paths(commit.get("removed"));
        }
    }
    let is_pull_request = payload.get("pull_request").is_some();
    if is_pull_request {
        push_paths(payload.get("pull_request").and_then(|pr| pr.get("changed_files_list")));
        push_paths(payload.get("files"));
    }
    push_paths(payload.get("changed_files"));

    Some(WebhookEvent {
        repo_url,
        default_branch,
        changed_paths,
        is_pull_request,
    })
}
