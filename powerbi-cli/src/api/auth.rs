//! Bearer token discovery
//!
//! The export endpoint accepts the same session token the PowerBI web app
//! uses. It can come from a flag, the environment, a dump of the browser's
//! sessionStorage for app.powerbi.com, or an interactive prompt.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use is_terminal::IsTerminal;
use serde_json::Value;

pub const TOKEN_ENV: &str = "POWERBI_TOKEN";

/// Tokens this short are fragments, not access tokens
const MIN_TOKEN_LEN: usize = 50;

/// Fields of an MSAL cache entry that may hold the access token
const TOKEN_FIELDS: [&str; 4] = ["secret", "accessToken", "access_token", "token"];

/// Where to look for a token, in precedence order
#[derive(Debug, Clone, Default)]
pub struct TokenSource {
    pub explicit: Option<String>,
    pub session_storage: Option<PathBuf>,
    pub allow_prompt: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenOrigin {
    Flag,
    Environment,
    SessionStorage(PathBuf),
    Prompt,
}

impl fmt::Display for TokenOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenOrigin::Flag => write!(f, "--token"),
            TokenOrigin::Environment => write!(f, "{}", TOKEN_ENV),
            TokenOrigin::SessionStorage(path) => write!(f, "session storage dump {}", path.display()),
            TokenOrigin::Prompt => write!(f, "interactive prompt"),
        }
    }
}

#[derive(Clone)]
pub struct ResolvedToken {
    pub token: String,
    pub origin: TokenOrigin,
}

// Keeps the token out of debug logs
impl fmt::Debug for ResolvedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedToken")
            .field("token", &token_summary(&self.token))
            .field("origin", &self.origin)
            .finish()
    }
}

pub fn resolve_token(source: &TokenSource) -> Result<ResolvedToken> {
    resolve_with_env(source, std::env::var(TOKEN_ENV).ok())
}

fn resolve_with_env(source: &TokenSource, env_token: Option<String>) -> Result<ResolvedToken> {
    if let Some(token) = source.explicit.as_deref().and_then(normalize) {
        log::debug!("Using token from --token");
        return Ok(ResolvedToken {
            token,
            origin: TokenOrigin::Flag,
        });
    }

    if let Some(token) = env_token.as_deref().and_then(normalize) {
        log::debug!("Using token from {}", TOKEN_ENV);
        return Ok(ResolvedToken {
            token,
            origin: TokenOrigin::Environment,
        });
    }

    if let Some(path) = &source.session_storage {
        match token_from_session_file(path)? {
            Some(token) => {
                log::debug!("Found token in session storage dump {}", path.display());
                return Ok(ResolvedToken {
                    token,
                    origin: TokenOrigin::SessionStorage(path.clone()),
                });
            }
            None => log::warn!("No PowerBI token found in {}", path.display()),
        }
    }

    if source.allow_prompt && std::io::stdin().is_terminal() {
        let input = rpassword::prompt_password("PowerBI bearer token: ")
            .context("Failed to read token from terminal")?;
        if let Some(token) = normalize(&input) {
            return Ok(ResolvedToken {
                token,
                origin: TokenOrigin::Prompt,
            });
        }
    }

    bail!(
        "Could not find a PowerBI authentication token.\n\
         Provide one of:\n\
         1. --token <TOKEN>\n\
         2. the {} environment variable (a .env file works too)\n\
         3. --session-storage <FILE>: a JSON export of sessionStorage taken on an\n   \
            app.powerbi.com report page after the report has fully loaded",
        TOKEN_ENV
    )
}

/// Trim and drop a pasted "Bearer " prefix
fn normalize(raw: &str) -> Option<String> {
    let token = raw.trim();
    let token = token
        .strip_prefix("Bearer ")
        .or_else(|| token.strip_prefix("bearer "))
        .unwrap_or(token)
        .trim();
    (!token.is_empty()).then(|| token.to_string())
}

pub fn token_from_session_file(path: &Path) -> Result<Option<String>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read session storage dump: {}", path.display()))?;
    token_from_session_json(&content)
        .with_context(|| format!("Invalid session storage dump: {}", path.display()))
}

/// Scan a sessionStorage dump (a JSON object of key -> string value)
pub fn token_from_session_json(content: &str) -> Result<Option<String>> {
    let storage: Value = serde_json::from_str(content).context("Session storage dump is not JSON")?;
    let Some(entries) = storage.as_object() else {
        bail!("Session storage dump must be a JSON object of key/value pairs");
    };

    Ok(scan_session_entries(
        entries
            .iter()
            .filter_map(|(k, v)| v.as_str().map(|v| (k.as_str(), v))),
    ))
}

/// First access token found in entries tied to a signed-in account
pub fn scan_session_entries<'a>(entries: impl IntoIterator<Item = (&'a str, &'a str)>) -> Option<String> {
    entries
        .into_iter()
        .filter(|(key, value)| key.contains("homeAccountId") || value.contains("homeAccountId"))
        .find_map(|(_, value)| {
            // Values that are not JSON are skipped
            let parsed: Value = serde_json::from_str(value).ok()?;
            let token = TOKEN_FIELDS
                .iter()
                .find_map(|field| parsed.get(*field).filter(|v| !v.is_null()))?;
            token
                .as_str()
                .filter(|t| t.len() > MIN_TOKEN_LEN)
                .map(str::to_string)
        })
}

/// Short description of a token that is safe to log
pub fn token_summary(token: &str) -> String {
    let prefix: String = token.chars().take(6).collect();
    format!("{}… ({} chars)", prefix, token.chars().count())
}
