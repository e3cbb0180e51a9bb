//! Mailbox capability consumed by the poller
//!
//! The poller only needs to list a folder and fetch bodies and attachment
//! bytes of the messages it emits. Any transport that can do those calls
//! implements [`MailboxClient`]; the shipped one is [`crate::ews::EwsClient`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::errors::AppResult;

/// One mailbox item as seen by a single listing
///
/// Identity is `id` alone; the remaining fields are carried for presentation
/// and ordering. Transports must drop items without an id before returning
/// them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct MessageSummary {
    /// Opaque, stable, non-empty item identifier
    pub id: String,
    /// Server change key for the item version, if reported
    pub change_key: Option<String>,
    /// Subject line
    pub subject: Option<String>,
    /// Sender display name
    pub from_name: Option<String>,
    /// Sender address
    pub from_address: Option<String>,
    /// When the server received the item; `None` sorts as oldest
    pub received_at: Option<DateTime<Utc>>,
    /// When the sender sent the item
    pub sent_at: Option<DateTime<Utc>>,
    /// Whether the server reports attachments on the item
    pub has_attachments: bool,
    /// Read flag
    pub is_read: Option<bool>,
}

impl MessageSummary {
    /// Summary with only the fields that drive change detection set
    pub fn new(id: impl Into<String>, received_at: Option<DateTime<Utc>>) -> Self {
        Self {
            id: id.into(),
            change_key: None,
            subject: None,
            from_name: None,
            from_address: None,
            received_at,
            sent_at: None,
            has_attachments: false,
            is_read: None,
        }
    }
}

/// Attachment metadata returned by [`MailboxClient::list_attachments`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AttachmentInfo {
    /// Attachment identifier accepted by [`MailboxClient::download_attachment`]
    pub id: String,
    /// Declared file name
    pub name: Option<String>,
    /// Declared MIME content type
    pub content_type: Option<String>,
    /// Declared size in bytes
    pub size: Option<u64>,
}

/// Message body returned by [`MailboxClient::get_body`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct MessageBody {
    /// Body format reported by the server (`Text` or `HTML`)
    pub body_type: String,
    /// Body content
    pub content: String,
}

/// Listing options for [`MailboxClient::list_messages`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListOptions {
    /// Upper bound on the number of items returned
    pub max_results: usize,
}

/// Mailbox operations the poller depends on
///
/// Every method is a suspension point and may fail with a transport-class
/// [`crate::errors::AppError`].
#[async_trait]
pub trait MailboxClient: Send + Sync {
    /// List items in `folder`, newest first by received time
    async fn list_messages(
        &self,
        folder: &str,
        options: ListOptions,
    ) -> AppResult<Vec<MessageSummary>>;

    /// Fetch the plain-text body of a message
    async fn get_body(&self, message_id: &str) -> AppResult<MessageBody>;

    /// List file attachments of a message
    async fn list_attachments(&self, message_id: &str) -> AppResult<Vec<AttachmentInfo>>;

    /// Download the content of one attachment
    async fn download_attachment(&self, attachment_id: &str) -> AppResult<Vec<u8>>;
}
