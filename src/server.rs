//! MCP server implementation with tool handlers
//!
//! Implements the `ServerHandler` trait and registers 5 MCP tools. Handles
//! input validation, poll orchestration, and response formatting.

use std::sync::Arc;
use std::time::Instant;

use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{ErrorData, ServerCapabilities, ServerInfo};
use rmcp::{Json, ServerHandler, tool, tool_handler, tool_router};

use crate::config::{AccountConfig, ServerConfig};
use crate::errors::{AppError, AppResult};
use crate::ews::EwsClient;
use crate::models::{
    AccountInfo, AccountOnlyInput, Meta, PollMessagesInput, PollResult, ResetResult,
    ResetTrackingInput, ToolEnvelope, TrackingStateView, TrackingUnitInput, VerifyResult,
};
use crate::poller::{PollRequest, Poller};
use crate::retry::RetryingMailbox;
use crate::state::{FileStateStore, StateStore, TrackingKey};

/// Maximum messages emitted per poll
const MAX_POLL_ITEMS: usize = 100;

/// EWS trigger MCP server
///
/// Holds shared configuration and the tracking state store. Implements MCP
/// tool handlers via `#[tool]` attribute macro and `ServerHandler` trait.
#[derive(Clone)]
pub struct WorkmailEwsServer {
    /// Server config (accounts, timeouts, retry settings)
    config: Arc<ServerConfig>,
    /// Tracking state persistence
    store: Arc<FileStateStore>,
    /// Tool router for dispatching MCP tool calls
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl WorkmailEwsServer {
    /// Create a new MCP server instance
    ///
    /// Tracking state lives under the configured state directory.
    pub fn new(config: ServerConfig) -> Self {
        let store = FileStateStore::new(config.state_dir.clone());
        Self {
            config: Arc::new(config),
            store: Arc::new(store),
            tool_router: Self::tool_router(),
        }
    }

    /// Tool: List configured EWS accounts
    ///
    /// Returns account metadata (endpoint, user) without exposing passwords.
    #[tool(
        name = "ews_list_accounts",
        description = "List configured EWS accounts"
    )]
    async fn list_accounts(&self) -> Result<Json<ToolEnvelope<Vec<AccountInfo>>>, ErrorData> {
        let started = Instant::now();
        let data = self
            .config
            .accounts
            .values()
            .map(|a| AccountInfo {
                account_id: a.account_id.clone(),
                ews_url: a.ews_url.clone(),
                user: a.user.clone(),
            })
            .collect::<Vec<_>>();
        finalize_tool(
            started,
            Ok((format!("{} account(s) configured", data.len()), data)),
        )
    }

    /// Tool: Verify endpoint and credentials
    ///
    /// Performs a `GetFolder` on the inbox and reports its counters.
    #[tool(
        name = "ews_verify_account",
        description = "Verify EWS endpoint and credentials"
    )]
    async fn verify_account(
        &self,
        Parameters(input): Parameters<AccountOnlyInput>,
    ) -> Result<Json<ToolEnvelope<VerifyResult>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            self.verify_account_impl(input)
                .await
                .map(|data| ("Account verification succeeded".to_owned(), data)),
        )
    }

    /// Tool: Run one poll cycle
    ///
    /// Scheduled mode reports only messages that arrived since the previous
    /// scheduled poll; the first poll records a baseline and reports nothing.
    /// Manual mode returns the newest messages without touching state.
    #[tool(
        name = "ews_poll_messages",
        description = "Poll a folder for new messages"
    )]
    async fn poll_messages(
        &self,
        Parameters(input): Parameters<PollMessagesInput>,
    ) -> Result<Json<ToolEnvelope<PollResult>>, ErrorData> {
        let started = Instant::now();
        let result = poll_once(&self.config, self.store.as_ref(), input)
            .await
            .map(|data| {
                let summary = if data.triggered {
                    format!("{} new message(s)", data.items.len())
                } else {
                    "No new messages".to_owned()
                };
                (summary, data)
            });
        finalize_tool(started, result)
    }

    /// Tool: Show stored tracking state
    #[tool(
        name = "ews_get_tracking_state",
        description = "Show stored tracking state for a folder"
    )]
    async fn get_tracking_state(
        &self,
        Parameters(input): Parameters<TrackingUnitInput>,
    ) -> Result<Json<ToolEnvelope<TrackingStateView>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            self.get_tracking_state_impl(input).await.map(|data| {
                let summary = if data.initialized {
                    format!("{} known message id(s)", data.known_ids_count)
                } else {
                    "Folder has not been polled yet".to_owned()
                };
                (summary, data)
            }),
        )
    }

    /// Tool: Forget tracking state
    ///
    /// The next scheduled poll records a fresh baseline. Requires explicit
    /// `confirm=true`.
    #[tool(
        name = "ews_reset_tracking",
        description = "Reset tracking state for a folder"
    )]
    async fn reset_tracking(
        &self,
        Parameters(input): Parameters<ResetTrackingInput>,
    ) -> Result<Json<ToolEnvelope<ResetResult>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            self.reset_tracking_impl(input).await.map(|data| {
                let summary = if data.cleared {
                    "Tracking state cleared".to_owned()
                } else {
                    "No tracking state stored".to_owned()
                };
                (summary, data)
            }),
        )
    }
}

/// MCP server handler implementation
///
/// Provides server info and capabilities to MCP client.
#[tool_handler(router = self.tool_router)]
impl ServerHandler for WorkmailEwsServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo::new(ServerCapabilities::builder().enable_tools().build()).with_instructions(
            "AWS WorkMail / Exchange EWS new-mail trigger. Call ews_poll_messages periodically with mode=scheduled; the first poll records a baseline and reports nothing.",
        )
    }
}

/// Tool implementation methods
///
/// Private methods handle the actual business logic for each tool, separated
/// from the public `#[tool]` methods that handle response formatting.
impl WorkmailEwsServer {
    async fn verify_account_impl(&self, input: AccountOnlyInput) -> AppResult<VerifyResult> {
        validate_account_id(&input.account_id)?;
        let account = self.config.get_account(&input.account_id)?;
        let client = EwsClient::new(&self.config, account)?;

        let started = Instant::now();
        let folder = self
            .config
            .retry_policy()
            .run("verify", || client.verify())
            .await?;

        Ok(VerifyResult {
            account_id: account.account_id.clone(),
            ok: true,
            latency_ms: duration_ms(started),
            inbox_display_name: folder.display_name,
            inbox_total_count: folder.total_count,
            inbox_unread_count: folder.unread_count,
        })
    }

    async fn get_tracking_state_impl(
        &self,
        input: TrackingUnitInput,
    ) -> AppResult<TrackingStateView> {
        let key = tracking_key(&self.config, &input.account_id, &input.folder)?;
        let state = self.store.load(&key).await?;
        Ok(TrackingStateView {
            account_id: key.account_id,
            folder: key.folder,
            initialized: state.initialized,
            known_ids_count: state.known_ids.len(),
            known_ids: state.known_ids,
        })
    }

    async fn reset_tracking_impl(&self, input: ResetTrackingInput) -> AppResult<ResetResult> {
        if !input.confirm {
            return Err(AppError::invalid("reset requires confirm=true"));
        }
        let key = tracking_key(&self.config, &input.account_id, &input.folder)?;
        let cleared = self.store.clear(&key).await?;
        Ok(ResetResult {
            account_id: key.account_id,
            folder: key.folder,
            cleared,
        })
    }
}

/// Run one poll cycle for a configured account
///
/// Shared by the `ews_poll_messages` tool and the `poll` subcommand.
pub async fn poll_once(
    config: &ServerConfig,
    store: &dyn StateStore,
    input: PollMessagesInput,
) -> AppResult<PollResult> {
    validate_max_items(input.max_items)?;
    let key = tracking_key(config, &input.account_id, &input.folder)?;
    let account = config.get_account(&key.account_id)?;
    let client = mailbox_for(config, account)?;

    let request = PollRequest {
        folder: key.folder.clone(),
        mode: input.mode,
        max_items: input.max_items,
        download_attachments: input.download_attachments,
    };
    let items = Poller::new(&client, store)
        .poll(&key, &request)
        .await?
        .into_items();

    Ok(PollResult {
        account_id: key.account_id,
        folder: key.folder,
        mode: input.mode,
        triggered: !items.is_empty(),
        items,
    })
}

/// EWS client for `account` with the configured retry policy
fn mailbox_for(
    config: &ServerConfig,
    account: &AccountConfig,
) -> AppResult<RetryingMailbox<EwsClient>> {
    Ok(RetryingMailbox::new(
        EwsClient::new(config, account)?,
        config.retry_policy(),
    ))
}

/// Validate inputs and build the tracking key for a configured account
fn tracking_key(config: &ServerConfig, account_id: &str, folder: &str) -> AppResult<TrackingKey> {
    validate_account_id(account_id)?;
    validate_folder(folder)?;
    config.get_account(account_id)?;
    Ok(TrackingKey::new(account_id, folder))
}

/// Calculate elapsed milliseconds
fn duration_ms(started: Instant) -> u64 {
    started.elapsed().as_millis().min(u128::from(u64::MAX)) as u64
}

/// Build a standardized MCP tool response envelope from business logic output
fn finalize_tool<T>(
    started: Instant,
    result: AppResult<(String, T)>,
) -> Result<Json<ToolEnvelope<T>>, ErrorData>
where
    T: schemars::JsonSchema,
{
    match result {
        Ok((summary, data)) => Ok(Json(ToolEnvelope {
            summary,
            data,
            meta: Meta::now(duration_ms(started)),
        })),
        Err(e) => Err(e.to_error_data()),
    }
}

/// Validate account_id format
fn validate_account_id(account_id: &str) -> AppResult<()> {
    if account_id.is_empty() || account_id.len() > 64 {
        return Err(AppError::InvalidInput(
            "account_id must be 1..64 characters".to_owned(),
        ));
    }
    if !account_id
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-')
    {
        return Err(AppError::InvalidInput(
            "account_id must match [A-Za-z0-9_-]+".to_owned(),
        ));
    }
    Ok(())
}

/// Validate folder id or distinguished name
fn validate_folder(folder: &str) -> AppResult<()> {
    let trimmed = folder.trim();
    if trimmed.is_empty() || trimmed.len() > 256 {
        return Err(AppError::InvalidInput(
            "folder must be 1..256 characters".to_owned(),
        ));
    }
    if folder.chars().any(char::is_control) {
        return Err(AppError::InvalidInput(
            "folder must not contain control characters".to_owned(),
        ));
    }
    Ok(())
}

/// Validate poll size
fn validate_max_items(max_items: usize) -> AppResult<()> {
    if !(1..=MAX_POLL_ITEMS).contains(&max_items) {
        return Err(AppError::invalid(format!(
            "max_items must be within 1..={MAX_POLL_ITEMS}"
        )));
    }
    Ok(())
}
