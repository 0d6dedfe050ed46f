//! Shared-secret bearer authentication.
//!
//! The secret is a random hex string stored in the project's token file
//! (`.ctxd/daemon.token`, mode `0600`). It is created lazily the first time
//! the supervisor starts a daemon and removed again on stop.
//!
//! # Contract
//!
//! - No token file on disk: every request is allowed. Authentication has
//!   simply not been configured yet.
//! - Token file present: the `Authorization` header must equal the token,
//!   either verbatim or after a leading `"Bearer "`.
//!
//! Comparison is constant-time: both values are tagged with HMAC-SHA256
//! under a fresh random key and the tags are checked with
//! [`Mac::verify_slice`].

use anyhow::{Context, Result};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use std::fs;
use std::io::{self, Write};
use std::path::Path;

type HmacSha256 = Hmac<Sha256>;

/// Number of random bytes in a token (hex-encoded to twice as many characters).
const TOKEN_BYTES: usize = 16;

/// Result of checking one request against the token file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthDecision {
    /// No token has been provisioned; the request passes.
    Open,
    /// The presented credential matched.
    Allowed,
    /// A token exists but the request carried no `Authorization` header.
    MissingCredential,
    /// The credential did not match (or the token file is unusable).
    InvalidCredential,
}

impl AuthDecision {
    pub fn is_allowed(self) -> bool {
        matches!(self, AuthDecision::Open | AuthDecision::Allowed)
    }
}

/// Generates a new random hex token.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Reads the stored token. `Ok(None)` means the file does not exist.
pub fn read_token(token_file: &Path) -> io::Result<Option<String>> {
    match fs::read_to_string(token_file) {
        Ok(raw) => Ok(Some(raw.trim().to_string())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Returns the existing token, creating the file with owner-only
/// permissions if it does not exist yet.
pub fn ensure_token(token_file: &Path) -> Result<String> {
    if let Some(existing) = read_token(token_file)
        .with_context(|| format!("Failed to read token file: {}", token_file.display()))?
    {
        if !existing.is_empty() {
            return Ok(existing);
        }
    }

    if let Some(parent) = token_file.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let token = generate_token();
    write_private(token_file, &token)
        .with_context(|| format!("Failed to write token file: {}", token_file.display()))?;
    tracing::info!(path = %token_file.display(), "provisioned auth token");
    Ok(token)
}

#[cfg(unix)]
fn write_private(path: &Path, contents: &str) -> io::Result<()> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // `mode` only applies on creation; tighten a pre-existing file too.
    file.set_permissions(fs::Permissions::from_mode(0o600))?;
    file.write_all(contents.as_bytes())
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &str) -> io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(contents.as_bytes())
}

/// Checks an `Authorization` header value against the token file.
pub fn authorize(token_file: &Path, header: Option<&str>) -> AuthDecision {
    let stored = match read_token(token_file) {
        Ok(None) => return AuthDecision::Open,
        Ok(Some(token)) => token,
        Err(e) => {
            tracing::error!(path = %token_file.display(), error = %e, "cannot read token file");
            return AuthDecision::InvalidCredential;
        }
    };

    if stored.is_empty() {
        tracing::warn!(path = %token_file.display(), "token file is empty, rejecting request");
        return AuthDecision::InvalidCredential;
    }

    let Some(header) = header else {
        return AuthDecision::MissingCredential;
    };

    let presented = header.strip_prefix("Bearer ").unwrap_or(header).trim();
    if tokens_match(&stored, presented) || tokens_match(&stored, header) {
        AuthDecision::Allowed
    } else {
        AuthDecision::InvalidCredential
    }
}

fn tokens_match(expected: &str, presented: &str) -> bool {
    let mut key = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut key);

    let Ok(mut expected_mac) = HmacSha256::new_from_slice(&key) else {
        return false;
    };
    expected_mac.update(expected.as_bytes());
    let expected_tag = expected_mac.finalize().into_bytes();

    let Ok(mut presented_mac) = HmacSha256::new_from_slice(&key) else {
        return false;
    };
    presented_mac.update(presented.as_bytes());
    presented_mac.verify_slice(&expected_tag).is_ok()
}
