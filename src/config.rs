//! Configuration module for EWS accounts and trigger settings
//!
//! All configuration is loaded from environment variables following the pattern
//! `WORKMAIL_EWS_<SEGMENT>_<KEY>`. Account segments are discovered by scanning
//! for `WORKMAIL_EWS_*_URL` variables.

use std::collections::BTreeMap;
use std::env;
use std::env::VarError;
use std::path::PathBuf;
use std::time::Duration;

use regex::Regex;
use secrecy::SecretString;

use crate::errors::{AppError, AppResult};
use crate::retry::RetryPolicy;

/// EWS account configuration
///
/// Holds the endpoint and credentials for a single mailbox. Passwords are
/// stored using `SecretString` to prevent accidental logging.
#[derive(Debug, Clone)]
pub struct AccountConfig {
    /// Account identifier (lowercase, used as default `account_id` parameter)
    pub account_id: String,
    /// EWS endpoint, e.g. `https://mobile.mail.eu-west-1.awsapps.com/EWS/Exchange.asmx`
    pub ews_url: String,
    /// Mailbox address used for Basic authentication
    pub user: String,
    /// Password stored in a type that prevents accidental logging
    pub pass: SecretString,
}

/// Server-wide configuration
///
/// Wraps all account configs and global trigger settings. Cloned into MCP tool
/// handlers via `Arc` for thread-safe shared access.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// All configured accounts, keyed by `account_id`
    pub accounts: BTreeMap<String, AccountConfig>,
    /// TCP/TLS connect timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Whole-request timeout for a single EWS call in milliseconds
    pub request_timeout_ms: u64,
    /// Directory holding one tracking-state file per (account, folder)
    pub state_dir: PathBuf,
    /// Total attempts per mailbox call, including the first
    pub retry_max_attempts: u32,
    /// Delay before each retry in milliseconds; the last entry repeats
    pub retry_backoff_ms: Vec<u64>,
}

impl ServerConfig {
    /// Load all configuration from environment variables
    ///
    /// Discovers accounts by scanning for `WORKMAIL_EWS_*_URL` patterns.
    /// If no accounts are explicitly defined, a `default` account is required
    /// via `WORKMAIL_EWS_DEFAULT_URL`, `WORKMAIL_EWS_DEFAULT_USER`, and
    /// `WORKMAIL_EWS_DEFAULT_PASS`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if required environment variables are missing
    /// or malformed.
    ///
    /// # Example Environment
    ///
    /// ```text
    /// WORKMAIL_EWS_DEFAULT_URL=https://mobile.mail.eu-west-1.awsapps.com/EWS/Exchange.asmx
    /// WORKMAIL_EWS_DEFAULT_USER=user@example.awsapps.com
    /// WORKMAIL_EWS_DEFAULT_PASS=secret
    /// WORKMAIL_EWS_SUPPORT_URL=https://outlook.office365.com/EWS/Exchange.asmx
    /// WORKMAIL_EWS_SUPPORT_USER=support@company.com
    /// WORKMAIL_EWS_SUPPORT_PASS=support-pass
    /// WORKMAIL_EWS_STATE_DIR=/var/lib/workmail-ews-trigger
    /// WORKMAIL_EWS_RETRY_BACKOFF_MS=500,2000,5000
    /// ```
    pub fn load_from_env() -> AppResult<Self> {
        let account_pattern = Regex::new(r"^WORKMAIL_EWS_([A-Z0-9_]+)_URL$")
            .map_err(|e| AppError::Internal(format!("invalid account regex: {e}")))?;

        let mut account_segments: Vec<String> = env::vars()
            .filter_map(|(k, _)| {
                account_pattern
                    .captures(&k)
                    .and_then(|c| c.get(1).map(|m| m.as_str().to_owned()))
            })
            .collect();

        if account_segments.is_empty() {
            account_segments.push("DEFAULT".to_owned());
        }

        account_segments.sort();
        account_segments.dedup();

        let mut accounts = BTreeMap::new();
        for seg in account_segments {
            let account = load_account(&seg)?;
            accounts.insert(account.account_id.clone(), account);
        }

        let retry_max_attempts = parse_u32_env("WORKMAIL_EWS_RETRY_MAX_ATTEMPTS", 3)?;
        if retry_max_attempts == 0 {
            return Err(AppError::InvalidInput(
                "WORKMAIL_EWS_RETRY_MAX_ATTEMPTS must be at least 1".to_owned(),
            ));
        }

        Ok(Self {
            accounts,
            connect_timeout_ms: parse_u64_env("WORKMAIL_EWS_CONNECT_TIMEOUT_MS", 30_000)?,
            request_timeout_ms: parse_u64_env("WORKMAIL_EWS_REQUEST_TIMEOUT_MS", 120_000)?,
            state_dir: env::var("WORKMAIL_EWS_STATE_DIR")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map_or_else(|| PathBuf::from(".workmail-ews-state"), PathBuf::from),
            retry_max_attempts,
            retry_backoff_ms: parse_millis_list_env(
                "WORKMAIL_EWS_RETRY_BACKOFF_MS",
                &[500, 2_000, 5_000],
            )?,
        })
    }

    /// Get account configuration by ID
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the account ID is not configured.
    pub fn get_account(&self, account_id: &str) -> AppResult<&AccountConfig> {
        self.accounts
            .get(account_id)
            .ok_or_else(|| AppError::NotFound(format!("account '{account_id}' is not configured")))
    }

    /// Retry policy applied at the mailbox client boundary
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_max_attempts,
            self.retry_backoff_ms
                .iter()
                .map(|ms| Duration::from_millis(*ms))
                .collect(),
        )
    }
}

/// Load a single account configuration from environment
///
/// Reads `WORKMAIL_EWS_<SEGMENT>_URL`, `_USER` and `_PASS`. Normalizes the
/// segment name to lowercase for `account_id` (`DEFAULT` becomes `default`).
fn load_account(segment: &str) -> AppResult<AccountConfig> {
    let prefix = format!("WORKMAIL_EWS_{}_", sanitize_segment(segment));
    let ews_url = required_env(&format!("{prefix}URL"))?;
    let user = required_env(&format!("{prefix}USER"))?;
    let pass = required_env(&format!("{prefix}PASS"))?;
    validate_ews_url(&ews_url, &format!("{prefix}URL"))?;

    Ok(AccountConfig {
        account_id: segment.to_ascii_lowercase(),
        ews_url: ews_url.trim().to_owned(),
        user,
        pass: SecretString::new(pass.into()),
    })
}

/// Reject endpoints that would send Basic credentials in clear text
fn validate_ews_url(url: &str, key: &str) -> AppResult<()> {
    let url = url.trim();
    let Some(rest) = url.strip_prefix("https://") else {
        return Err(AppError::InvalidInput(format!(
            "{key} must be an https:// URL; plaintext EWS is not supported"
        )));
    };
    if rest.is_empty() || rest.starts_with('/') {
        return Err(AppError::InvalidInput(format!("{key} is missing a host")));
    }
    Ok(())
}

/// Read a required environment variable, returning error if missing or empty
fn required_env(key: &str) -> AppResult<String> {
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(AppError::InvalidInput(format!(
            "missing required environment variable {key}"
        ))),
    }
}

/// Sanitize an account segment to uppercase alphanumeric/underscore
///
/// Non-alphanumeric characters are replaced with underscores, and leading/
/// trailing underscores are trimmed.
fn sanitize_segment(seg: &str) -> String {
    let mut out = String::with_capacity(seg.len());
    for ch in seg.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_uppercase());
        } else {
            out.push('_');
        }
    }
    out.trim_matches('_').to_owned()
}

/// Parse a `u32` environment variable with default fallback
///
/// # Errors
///
/// Returns `InvalidInput` if the variable is set but not a valid `u32`.
fn parse_u32_env(key: &str, default: u32) -> AppResult<u32> {
    match env::var(key) {
        Ok(v) => v.trim().parse::<u32>().map_err(|_| {
            AppError::InvalidInput(format!("invalid u32 environment variable {key}: '{v}'"))
        }),
        Err(VarError::NotPresent) => Ok(default),
        Err(VarError::NotUnicode(_)) => Err(AppError::InvalidInput(format!(
            "environment variable {key} contains non-unicode data"
        ))),
    }
}

/// Parse a `u64` environment variable with default fallback
///
/// # Errors
///
/// Returns `InvalidInput` if the variable is set but not a valid `u64`.
fn parse_u64_env(key: &str, default: u64) -> AppResult<u64> {
    match env::var(key) {
        Ok(v) => v.trim().parse::<u64>().map_err(|_| {
            AppError::InvalidInput(format!("invalid u64 environment variable {key}: '{v}'"))
        }),
        Err(VarError::NotPresent) => Ok(default),
        Err(VarError::NotUnicode(_)) => Err(AppError::InvalidInput(format!(
            "environment variable {key} contains non-unicode data"
        ))),
    }
}

/// Parse a comma-separated list of milliseconds with default fallback
fn parse_millis_list_env(key: &str, default: &[u64]) -> AppResult<Vec<u64>> {
    match env::var(key) {
        Ok(v) => parse_millis_list(&v).ok_or_else(|| {
            AppError::InvalidInput(format!(
                "invalid millisecond list environment variable {key}: '{v}'"
            ))
        }),
        Err(VarError::NotPresent) => Ok(default.to_vec()),
        Err(VarError::NotUnicode(_)) => Err(AppError::InvalidInput(format!(
            "environment variable {key} contains non-unicode data"
        ))),
    }
}

fn parse_millis_list(value: &str) -> Option<Vec<u64>> {
    if value.trim().is_empty() {
        return Some(Vec::new());
    }
    value
        .split(',')
        .map(|part| part.trim().parse::<u64>().ok())
        .collect()
}
