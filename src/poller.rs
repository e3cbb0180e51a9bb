//! One poll cycle for a tracking unit
//!
//! Lists the folder, orders it newest first, asks the [`ChangeDetector`] what
//! is new (scheduled mode) or takes the newest messages as-is (manual mode),
//! fetches bodies and optionally attachments of the emitted messages, and
//! persists the next tracking state.

use std::cmp::Reverse;
use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::future::join_all;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize, Serializer};
use tracing::{debug, info, warn};

use crate::detector::ChangeDetector;
use crate::errors::AppResult;
use crate::mailbox::{AttachmentInfo, ListOptions, MailboxClient, MessageSummary};
use crate::state::{StateStore, TrackingKey};

/// Minimum number of items requested from the server per poll
const MIN_FETCH: usize = 50;
/// Over-fetch factor applied to `max_items`
const FETCH_FACTOR: usize = 3;
/// Content type used when the server does not report one
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// How the host invoked the poll
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum PollMode {
    /// Interactive test run: newest messages, tracking state untouched
    Manual,
    /// Regular scheduled run with change detection
    #[default]
    Scheduled,
}

/// Parameters of one poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollRequest {
    /// Folder id or distinguished folder name
    pub folder: String,
    /// Invocation mode
    pub mode: PollMode,
    /// Maximum messages emitted (1..=100)
    pub max_items: usize,
    /// Download attachments of emitted messages
    pub download_attachments: bool,
}

/// Downloaded attachment content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, JsonSchema)]
pub struct AttachmentPayload {
    /// Raw bytes, base64 in JSON
    #[serde(serialize_with = "serialize_base64")]
    #[schemars(with = "String")]
    pub data: Vec<u8>,
    /// File name
    pub filename: String,
    /// MIME content type
    pub content_type: String,
}

/// One message surfaced to the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, JsonSchema)]
pub struct EmittedItem {
    /// Message summary as listed
    pub message: MessageSummary,
    /// Plain-text body; absent if it could not be fetched
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Body format reported by the server
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_type: Option<String>,
    /// Attachments keyed by slot name (`attachment_0`, `attachment_1`, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachments: Option<BTreeMap<String, AttachmentPayload>>,
}

/// Result of a poll cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Messages to deliver, newest first
    Emitted(Vec<EmittedItem>),
    /// Nothing to deliver
    NoOutput,
}

impl PollOutcome {
    /// Emitted items, empty for `NoOutput`
    pub fn into_items(self) -> Vec<EmittedItem> {
        match self {
            Self::Emitted(items) => items,
            Self::NoOutput => Vec::new(),
        }
    }
}

fn serialize_base64<T, S>(data: &T, serializer: S) -> Result<S::Ok, S::Error>
where
    T: AsRef<[u8]>,
    S: Serializer,
{
    serializer.serialize_str(&BASE64.encode(data.as_ref()))
}

/// Number of items requested from the server for `max_items`
///
/// Messages that arrive beyond this window between two polls are never seen.
pub fn fetch_size(max_items: usize) -> usize {
    max_items.saturating_mul(FETCH_FACTOR).max(MIN_FETCH)
}

/// Runs poll cycles against a mailbox and a state store
pub struct Poller<'a> {
    client: &'a dyn MailboxClient,
    store: &'a dyn StateStore,
    detector: ChangeDetector,
}

impl<'a> Poller<'a> {
    /// Create a poller with the default detector capacity
    pub fn new(client: &'a dyn MailboxClient, store: &'a dyn StateStore) -> Self {
        Self {
            client,
            store,
            detector: ChangeDetector::default(),
        }
    }

    /// Run one poll cycle for `key`
    ///
    /// # Errors
    ///
    /// - Any listing error, with tracking state left untouched
    /// - State load errors in scheduled mode
    /// - `StatePersist` if the next state cannot be written; emitted items
    ///   are dropped and will be emitted again by the next poll
    pub async fn poll(&self, key: &TrackingKey, request: &PollRequest) -> AppResult<PollOutcome> {
        let max_items = request.max_items.max(1);
        let mut messages = self
            .client
            .list_messages(
                &request.folder,
                ListOptions {
                    max_results: fetch_size(max_items),
                },
            )
            .await?;
        messages.sort_by_key(|m| Reverse(m.received_at));

        let items = match request.mode {
            PollMode::Manual => {
                messages.truncate(max_items);
                self.build_items(messages, request.download_attachments).await
            }
            PollMode::Scheduled => {
                let state = self.store.load(key).await?;
                let decision = self.detector.decide(&messages, &state, max_items);
                debug!(
                    account_id = %key.account_id,
                    folder = %key.folder,
                    listed = messages.len(),
                    known = state.known_ids.len(),
                    capacity = self.detector.capacity(),
                    new = decision.emit.len(),
                    "change detection complete"
                );

                let items = self
                    .build_items(decision.emit, request.download_attachments)
                    .await;
                if decision.next_state != state {
                    self.store.save(key, &decision.next_state).await?;
                }
                items
            }
        };

        Ok(finish(key, request.mode, items))
    }

    async fn build_items(
        &self,
        messages: Vec<MessageSummary>,
        download_attachments: bool,
    ) -> Vec<EmittedItem> {
        let mut items = Vec::with_capacity(messages.len());
        for message in messages {
            let body = match self.client.get_body(&message.id).await {
                Ok(body) => Some(body),
                Err(e) => {
                    warn!(message_id = %message.id, error = %e, "failed to fetch message body");
                    None
                }
            };
            let attachments = if download_attachments && message.has_attachments {
                self.fetch_attachments(&message.id).await
            } else {
                None
            };
            let (body_type, body) = match body {
                Some(b) => (Some(b.body_type), Some(b.content)),
                None => (None, None),
            };
            items.push(EmittedItem {
                message,
                body,
                body_type,
                attachments,
            });
        }
        items
    }

    /// Download all file attachments of a message; failures are logged and skipped
    async fn fetch_attachments(
        &self,
        message_id: &str,
    ) -> Option<BTreeMap<String, AttachmentPayload>> {
        let listed = match self.client.list_attachments(message_id).await {
            Ok(listed) => listed,
            Err(e) => {
                warn!(message_id, error = %e, "failed to list attachments");
                return None;
            }
        };

        let downloads = listed
            .iter()
            .enumerate()
            .map(|(index, info)| self.fetch_attachment(message_id, index, info));
        let slots: BTreeMap<_, _> = join_all(downloads).await.into_iter().flatten().collect();

        if slots.is_empty() { None } else { Some(slots) }
    }

    async fn fetch_attachment(
        &self,
        message_id: &str,
        index: usize,
        info: &AttachmentInfo,
    ) -> Option<(String, AttachmentPayload)> {
        let slot = format!("attachment_{index}");
        match self.client.download_attachment(&info.id).await {
            Ok(data) => {
                let payload = AttachmentPayload {
                    data,
                    filename: info.name.clone().unwrap_or_else(|| slot.clone()),
                    content_type: info
                        .content_type
                        .clone()
                        .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_owned()),
                };
                Some((slot, payload))
            }
            Err(e) => {
                warn!(
                    message_id,
                    attachment_id = %info.id,
                    error = %e,
                    "failed to download attachment"
                );
                None
            }
        }
    }
}

fn finish(key: &TrackingKey, mode: PollMode, items: Vec<EmittedItem>) -> PollOutcome {
    if items.is_empty() {
        debug!(account_id = %key.account_id, folder = %key.folder, ?mode, "no output");
        return PollOutcome::NoOutput;
    }
    info!(
        account_id = %key.account_id,
        folder = %key.folder,
        ?mode,
        count = items.len(),
        "emitting messages"
    );
    PollOutcome::Emitted(items)
}
