//! Credential handling and message sanitization
//!
//! Credentials are short-lived tokens supplied by a provider. They are never
//! persisted or logged; anything that may carry one passes through
//! [`sanitize`] before it reaches a log line or a result message.

use std::fmt;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use crate::{Error, Result};

const MASK: &str = "***";

static URL_USERINFO_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b([a-z][a-z0-9+.\-]*://)[^/\s@]+@").expect("static regex is valid")
});

static TOKEN_SHAPED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(gh[pousr]_[A-Za-z0-9]{16,}|github_pat_[A-Za-z0-9_]{16,}|glpat-[A-Za-z0-9_\-]{16,})")
        .expect("static regex is valid")
});

/// A secret access token
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token. Only pass this to the process that needs it.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential({})", MASK)
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(MASK)
    }
}

/// Source of short-lived credentials
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Fetch a credential, or `None` for anonymous access
    async fn credential(&self) -> Result<Option<Credential>>;
}

/// Reads a token from an environment variable on every request
#[derive(Debug, Clone)]
pub struct EnvCredentialProvider {
    var: String,
}

impl EnvCredentialProvider {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

#[async_trait]
impl CredentialProvider for EnvCredentialProvider {
    async fn credential(&self) -> Result<Option<Credential>> {
        match std::env::var(&self.var) {
            Ok(token) if !token.trim().is_empty() => Ok(Some(Credential::new(token.trim()))),
            Ok(_) | Err(std::env::VarError::NotPresent) => Ok(None),
            Err(e) => Err(Error::Credential(format!("{}: {}", self.var, e))),
        }
    }
}

/// Strip credential material from a message
///
/// Masks the literal token (and its URL-encoded form), URL userinfo, and
/// anything shaped like a hosting access token.
pub fn sanitize(message: &str, credential: Option<&Credential>) -> String {
    let mut out = message.to_string();

    if let Some(credential) = credential {
        let token = credential.expose();
        if !token.is_empty() {
            out = out.replace(token, MASK);
            let encoded = urlencoding::encode(token);
            if encoded != token {
                out = out.replace(encoded.as_ref(), MASK);
            }
        }
    }

    let out = URL_USERINFO_RE.replace_all(&out, format!("${{1}}{}@", MASK));
    TOKEN_SHAPED_RE.replace_all(&out, MASK).into_owned()
}
