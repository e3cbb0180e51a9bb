//! Input/output DTOs and schema-bearing types
//!
//! Defines all data structures used in MCP tool contracts. Each type is
//! annotated with `JsonSchema` for automatic schema generation.

use chrono::{SecondsFormat, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::poller::{EmittedItem, PollMode};

/// Metadata included in all tool responses
///
/// Provides timing information and current UTC timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Meta {
    /// Current UTC timestamp in RFC 3339 format with milliseconds
    pub now_utc: String,
    /// Tool execution duration in milliseconds
    pub duration_ms: u64,
}

impl Meta {
    /// Create metadata populated with current time and elapsed duration
    pub fn now(duration_ms: u64) -> Self {
        Self {
            now_utc: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            duration_ms,
        }
    }
}

/// Standard response envelope for all tools
///
/// Wraps tool-specific data with human-readable summary and execution metadata.
/// This structure provides consistent response shape across all MCP tools.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ToolEnvelope<T>
where
    T: JsonSchema,
{
    /// Human-readable summary of the operation outcome
    pub summary: String,
    /// Tool-specific data payload
    pub data: T,
    /// Execution metadata (timestamp, duration)
    pub meta: Meta,
}

/// Account metadata (no credentials)
///
/// Returned by `ews_list_accounts`. Password is intentionally excluded.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AccountInfo {
    /// Account identifier
    pub account_id: String,
    /// EWS endpoint URL
    pub ews_url: String,
    /// Mailbox user name
    pub user: String,
}

/// Result of `ews_verify_account`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct VerifyResult {
    /// Account identifier
    pub account_id: String,
    /// Always `true`; failures are returned as errors
    pub ok: bool,
    /// Round-trip latency of the `GetFolder` call
    pub latency_ms: u64,
    /// Inbox display name as reported by the server
    pub inbox_display_name: Option<String>,
    /// Inbox item count
    pub inbox_total_count: Option<u64>,
    /// Inbox unread count
    pub inbox_unread_count: Option<u64>,
}

/// Result of `ews_poll_messages`
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct PollResult {
    /// Account identifier
    pub account_id: String,
    /// Normalized folder
    pub folder: String,
    /// Mode the poll ran in
    pub mode: PollMode,
    /// Whether any item was emitted
    pub triggered: bool,
    /// Emitted items, newest first
    pub items: Vec<EmittedItem>,
}

/// Stored tracking state of one unit
///
/// Returned by `ews_get_tracking_state`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TrackingStateView {
    /// Account identifier
    pub account_id: String,
    /// Normalized folder
    pub folder: String,
    /// Whether a baseline has been recorded
    pub initialized: bool,
    /// Number of remembered ids
    pub known_ids_count: usize,
    /// Remembered ids, newest first
    pub known_ids: Vec<String>,
}

/// Result of `ews_reset_tracking`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ResetResult {
    /// Account identifier
    pub account_id: String,
    /// Normalized folder
    pub folder: String,
    /// Whether stored state existed and was removed
    pub cleared: bool,
}

/// Input: account_id only
///
/// Used by `ews_verify_account`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct AccountOnlyInput {
    /// Account identifier (defaults to `"default"`)
    #[serde(default = "default_account_id")]
    pub account_id: String,
}

/// Input: run one poll cycle
///
/// Used by `ews_poll_messages`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct PollMessagesInput {
    /// Account identifier (defaults to `"default"`)
    #[serde(default = "default_account_id")]
    pub account_id: String,
    /// Folder id or distinguished name such as `inbox` (defaults to `"inbox"`)
    #[serde(default = "default_folder")]
    pub folder: String,
    /// `scheduled` (change detection) or `manual` (newest messages, no state)
    #[serde(default)]
    pub mode: PollMode,
    /// Maximum messages to emit (1..100, default 10)
    #[serde(default = "default_max_items")]
    pub max_items: usize,
    /// Download file attachments of emitted messages
    #[serde(default)]
    pub download_attachments: bool,
}

/// Input: identify a tracking unit
///
/// Used by `ews_get_tracking_state`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct TrackingUnitInput {
    /// Account identifier (defaults to `"default"`)
    #[serde(default = "default_account_id")]
    pub account_id: String,
    /// Folder id or distinguished name (defaults to `"inbox"`)
    #[serde(default = "default_folder")]
    pub folder: String,
}

/// Input: reset tracking state
///
/// Used by `ews_reset_tracking`. Requires explicit `confirm=true`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ResetTrackingInput {
    /// Account identifier (defaults to `"default"`)
    #[serde(default = "default_account_id")]
    pub account_id: String,
    /// Folder id or distinguished name (defaults to `"inbox"`)
    #[serde(default = "default_folder")]
    pub folder: String,
    /// Explicit confirmation required (must be `true`)
    pub confirm: bool,
}

/// Default value for `account_id` field
pub fn default_account_id() -> String {
    "default".to_owned()
}

/// Default value for `folder` fields
pub fn default_folder() -> String {
    "inbox".to_owned()
}

/// Default value for `max_items`
pub fn default_max_items() -> usize {
    10
}
