//! EWS transport
//!
//! Posts SOAP envelopes to an Exchange Web Services endpoint with Basic
//! authentication over TLS and parses the responses with `quick-xml`. Only the
//! calls the poller needs are implemented: `FindItem` for listing, `GetItem`
//! for bodies and attachment metadata, `GetAttachment` for content, and
//! `GetFolder` as a credential check.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use crate::config::{AccountConfig, ServerConfig};
use crate::errors::{AppError, AppResult};
use crate::mailbox::{AttachmentInfo, ListOptions, MailboxClient, MessageBody, MessageSummary};

/// Exchange schema version requested on every call
const SERVER_VERSION: &str = "Exchange2010_SP2";
/// EWS messages namespace; also the `SOAPAction` prefix
const MESSAGES_NS: &str = "http://schemas.microsoft.com/exchange/services/2006/messages";
/// Upper bound for server-provided error text carried into `AppError`
const MAX_ERROR_CHARS: usize = 500;

/// Folder names EWS resolves without an opaque folder id
const DISTINGUISHED_FOLDERS: &[&str] = &[
    "inbox",
    "sentitems",
    "deleteditems",
    "drafts",
    "junkemail",
    "msgfolderroot",
    "calendar",
    "contacts",
];

/// Item element names that carry mail messages in a `FindItem` response
const MESSAGE_ELEMENTS: &[&str] = &[
    "Message",
    "MeetingRequest",
    "MeetingResponse",
    "MeetingCancellation",
];

/// Canonical distinguished folder name for `folder`, if it is one
///
/// Matching is case-insensitive (`Inbox`, `INBOX`, `inbox`).
pub fn distinguished_folder_name(folder: &str) -> Option<&'static str> {
    DISTINGUISHED_FOLDERS
        .iter()
        .copied()
        .find(|name| name.eq_ignore_ascii_case(folder))
}

/// Folder metadata returned by [`EwsClient::verify`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderInfo {
    /// Display name of the folder
    pub display_name: Option<String>,
    /// Total item count
    pub total_count: Option<u64>,
    /// Unread item count
    pub unread_count: Option<u64>,
}

/// EWS client bound to one account
pub struct EwsClient {
    http: reqwest::Client,
    url: String,
    user: String,
    pass: SecretString,
}

impl EwsClient {
    /// Build a client for `account` with timeouts from server config
    ///
    /// # Errors
    ///
    /// - `Internal` if the HTTP client cannot be constructed
    pub fn new(server: &ServerConfig, account: &AccountConfig) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(server.connect_timeout_ms))
            .timeout(Duration::from_millis(server.request_timeout_ms))
            .https_only(true)
            .build()
            .map_err(|e| AppError::Internal(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            http,
            url: account.ews_url.clone(),
            user: account.user.clone(),
            pass: account.pass.clone(),
        })
    }

    /// Check endpoint and credentials with a `GetFolder` on the inbox
    pub async fn verify(&self) -> AppResult<FolderInfo> {
        let body = format!(
            "<m:GetFolder>\
             <m:FolderShape><t:BaseShape>Default</t:BaseShape></m:FolderShape>\
             <m:FolderIds>{}</m:FolderIds>\
             </m:GetFolder>",
            folder_id_xml("inbox")
        );
        let doc = self.call("GetFolder", &body).await?;
        parse_folder(&doc)
    }

    /// Post one SOAP request and return the checked response document
    ///
    /// # Errors
    ///
    /// - `Timeout` if the request exceeds the configured timeouts
    /// - `AuthFailed` on HTTP 401/403 or access-denied response codes
    /// - `NotFound` for missing folders, items or attachments
    /// - `Transport` for network failures, SOAP faults and other errors
    async fn call(&self, operation: &'static str, body: &str) -> AppResult<XmlNode> {
        let started = Instant::now();
        let response = self
            .http
            .post(&self.url)
            .basic_auth(&self.user, Some(self.pass.expose_secret()))
            .header(CONTENT_TYPE, "text/xml; charset=utf-8")
            .header("SOAPAction", soap_action(operation))
            .body(envelope(body))
            .send()
            .await
            .map_err(|e| request_error(operation, &e))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(AppError::AuthFailed(format!(
                "EWS {operation} rejected credentials (HTTP {status})"
            )));
        }

        let text = response
            .text()
            .await
            .map_err(|e| request_error(operation, &e))?;

        if !status.is_success() {
            // Exchange reports SOAP faults with HTTP 500.
            let detail = parse_document(&text)
                .ok()
                .and_then(|doc| fault_message(&doc))
                .unwrap_or_else(|| format!("HTTP {status}"));
            return Err(AppError::Transport(format!(
                "EWS {operation} failed: {}",
                truncate_chars(&detail, MAX_ERROR_CHARS)
            )));
        }

        let doc = parse_document(&text)?;
        check_response(&doc, operation)?;
        debug!(
            operation,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "EWS call completed"
        );
        Ok(doc)
    }
}

#[async_trait]
impl MailboxClient for EwsClient {
    async fn list_messages(
        &self,
        folder: &str,
        options: ListOptions,
    ) -> AppResult<Vec<MessageSummary>> {
        let body = format!(
            "<m:FindItem Traversal=\"Shallow\">\
             <m:ItemShape>\
             <t:BaseShape>IdOnly</t:BaseShape>\
             <t:AdditionalProperties>\
             <t:FieldURI FieldURI=\"item:Subject\"/>\
             <t:FieldURI FieldURI=\"item:DateTimeReceived\"/>\
             <t:FieldURI FieldURI=\"item:DateTimeSent\"/>\
             <t:FieldURI FieldURI=\"item:HasAttachments\"/>\
             <t:FieldURI FieldURI=\"message:From\"/>\
             <t:FieldURI FieldURI=\"message:IsRead\"/>\
             </t:AdditionalProperties>\
             </m:ItemShape>\
             <m:IndexedPageItemView MaxEntriesReturned=\"{}\" Offset=\"0\" BasePoint=\"Beginning\"/>\
             <m:SortOrder>\
             <t:FieldOrder Order=\"Descending\"><t:FieldURI FieldURI=\"item:DateTimeReceived\"/></t:FieldOrder>\
             </m:SortOrder>\
             <m:ParentFolderIds>{}</m:ParentFolderIds>\
             </m:FindItem>",
            options.max_results.max(1),
            folder_id_xml(folder)
        );
        let doc = self.call("FindItem", &body).await?;
        let messages = parse_find_item(&doc);
        debug!(folder, count = messages.len(), "listed folder items");
        Ok(messages)
    }

    async fn list_attachments(&self, message_id: &str) -> AppResult<Vec<AttachmentInfo>> {
        let body = format!(
            "<m:GetItem>\
             <m:ItemShape>\
             <t:BaseShape>IdOnly</t:BaseShape>\
             <t:AdditionalProperties><t:FieldURI FieldURI=\"item:Attachments\"/></t:AdditionalProperties>\
             </m:ItemShape>\
             <m:ItemIds><t:ItemId Id=\"{}\"/></m:ItemIds>\
             </m:GetItem>",
            escape(message_id)
        );
        let doc = self.call("GetItem", &body).await?;
        Ok(parse_attachment_list(&doc))
    }

    async fn get_body(&self, message_id: &str) -> AppResult<MessageBody> {
        let body = format!(
            "<m:GetItem>\
             <m:ItemShape>\
             <t:BaseShape>IdOnly</t:BaseShape>\
             <t:BodyType>Text</t:BodyType>\
             <t:AdditionalProperties><t:FieldURI FieldURI=\"item:Body\"/></t:AdditionalProperties>\
             </m:ItemShape>\
             <m:ItemIds><t:ItemId Id=\"{}\"/></m:ItemIds>\
             </m:GetItem>",
            escape(message_id)
        );
        let doc = self.call("GetItem", &body).await?;
        Ok(parse_body(&doc))
    }

    async fn download_attachment(&self, attachment_id: &str) -> AppResult<Vec<u8>> {
        let body = format!(
            "<m:GetAttachment>\
             <m:AttachmentIds><t:AttachmentId Id=\"{}\"/></m:AttachmentIds>\
             </m:GetAttachment>",
            escape(attachment_id)
        );
        let doc = self.call("GetAttachment", &body).await?;
        parse_attachment_content(&doc, attachment_id)
    }
}

/// Wrap an operation body in a SOAP 1.1 envelope
fn envelope(body: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\
         <soap:Envelope xmlns:soap=\"http://schemas.xmlsoap.org/soap/envelope/\" \
         xmlns:t=\"http://schemas.microsoft.com/exchange/services/2006/types\" \
         xmlns:m=\"{MESSAGES_NS}\">\
         <soap:Header><t:RequestServerVersion Version=\"{SERVER_VERSION}\"/></soap:Header>\
         <soap:Body>{body}</soap:Body>\
         </soap:Envelope>"
    )
}

/// `SOAPAction` header value for an operation
fn soap_action(operation: &str) -> String {
    format!("{MESSAGES_NS}/{operation}")
}

/// Folder reference element for a distinguished name or opaque id
fn folder_id_xml(folder: &str) -> String {
    match distinguished_folder_name(folder) {
        Some(name) => format!("<t:DistinguishedFolderId Id=\"{name}\"/>"),
        None => format!("<t:FolderId Id=\"{}\"/>", escape(folder)),
    }
}

fn request_error(operation: &str, err: &reqwest::Error) -> AppError {
    if err.is_timeout() {
        AppError::Timeout(format!("EWS {operation} timed out"))
    } else {
        AppError::Transport(format!("EWS {operation} request failed: {err}"))
    }
}

/// Minimal element tree built from a response
///
/// Names are local names; namespace prefixes are dropped.
#[derive(Debug, Default)]
struct XmlNode {
    name: String,
    attrs: Vec<(String, String)>,
    text: String,
    children: Vec<XmlNode>,
}

impl XmlNode {
    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find_map(|(k, v)| (k == name).then_some(v.as_str()))
    }

    fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Trimmed, non-empty text of a direct child
    fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name)
            .map(|c| c.text.trim())
            .filter(|t| !t.is_empty())
    }

    /// First descendant (depth-first, self excluded) named `name`
    fn find(&self, name: &str) -> Option<&XmlNode> {
        self.children
            .iter()
            .find_map(|c| if c.name == name { Some(c) } else { c.find(name) })
    }

    fn collect<'a>(&'a self, pred: &dyn Fn(&XmlNode) -> bool, out: &mut Vec<&'a XmlNode>) {
        for child in &self.children {
            if pred(child) {
                out.push(child);
            }
            child.collect(pred, out);
        }
    }
}

fn parse_document(xml: &str) -> AppResult<XmlNode> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack = vec![XmlNode::default()];
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => stack.push(element(&e)?),
            Ok(Event::Empty(e)) => {
                let node = element(&e)?;
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(node);
                }
            }
            Ok(Event::End(_)) => {
                let node = stack.pop();
                match (node, stack.last_mut()) {
                    (Some(node), Some(parent)) => parent.children.push(node),
                    _ => return Err(malformed("unbalanced end tag")),
                }
            }
            Ok(Event::Text(t)) => {
                let text = t.unescape().map_err(|e| malformed(&e.to_string()))?;
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&text);
                }
            }
            Ok(Event::CData(c)) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&c));
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(malformed(&e.to_string())),
        }
    }

    match (stack.pop(), stack.is_empty()) {
        (Some(root), true) => Ok(root),
        _ => Err(malformed("unclosed element")),
    }
}

fn element(e: &BytesStart<'_>) -> AppResult<XmlNode> {
    let mut node = XmlNode {
        name: String::from_utf8_lossy(e.local_name().as_ref()).into_owned(),
        ..XmlNode::default()
    };
    for attr in e.attributes() {
        let attr = attr.map_err(|e| malformed(&e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| malformed(&e.to_string()))?
            .into_owned();
        node.attrs.push((key, value));
    }
    Ok(node)
}

fn malformed(detail: &str) -> AppError {
    AppError::Transport(format!("malformed EWS response: {detail}"))
}

fn fault_message(doc: &XmlNode) -> Option<String> {
    let fault = doc.find("Fault")?;
    Some(
        fault
            .child_text("faultstring")
            .unwrap_or("SOAP fault without faultstring")
            .to_owned(),
    )
}

/// Fail on SOAP faults and on any response message with `ResponseClass="Error"`
fn check_response(doc: &XmlNode, operation: &str) -> AppResult<()> {
    if let Some(fault) = fault_message(doc) {
        return Err(AppError::Transport(format!(
            "EWS {operation} fault: {}",
            truncate_chars(&fault, MAX_ERROR_CHARS)
        )));
    }

    let mut messages = Vec::new();
    doc.collect(&|n| n.attr("ResponseClass").is_some(), &mut messages);
    for message in messages {
        if message.attr("ResponseClass") != Some("Error") {
            continue;
        }
        let code = message.child_text("ResponseCode").unwrap_or("ErrorUnknown");
        let text = message
            .child_text("MessageText")
            .map_or_else(String::new, |t| format!(": {}", truncate_chars(t, MAX_ERROR_CHARS)));
        return Err(classify_response_code(
            code,
            format!("EWS {operation} returned {code}{text}"),
        ));
    }
    Ok(())
}

fn classify_response_code(code: &str, msg: String) -> AppError {
    match code {
        "ErrorFolderNotFound" | "ErrorItemNotFound" | "ErrorCannotFindFileAttachment"
        | "ErrorAttachmentNotFound" => AppError::NotFound(msg),
        "ErrorAccessDenied" | "ErrorNonExistentMailbox" => AppError::AuthFailed(msg),
        "ErrorInvalidIdMalformed" | "ErrorInvalidIdEmpty" | "ErrorInvalidRequest"
        | "ErrorSchemaValidation" => AppError::InvalidInput(msg),
        _ => AppError::Transport(msg),
    }
}

fn parse_timestamp(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw?;
    match DateTime::parse_from_rfc3339(raw) {
        Ok(ts) => Some(ts.with_timezone(&Utc)),
        Err(e) => {
            debug!(value = raw, error = %e, "unparseable EWS timestamp");
            None
        }
    }
}

fn parse_bool(raw: Option<&str>) -> Option<bool> {
    match raw? {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

/// Extract message summaries from a `FindItem` response
///
/// Items without an `ItemId` cannot be tracked and are dropped here.
fn parse_find_item(doc: &XmlNode) -> Vec<MessageSummary> {
    let Some(items) = doc.find("Items") else {
        return Vec::new();
    };

    let mut messages = Vec::with_capacity(items.children.len());
    for item in &items.children {
        if !MESSAGE_ELEMENTS.contains(&item.name.as_str()) {
            continue;
        }
        let item_id = item.child("ItemId");
        let Some(id) = item_id.and_then(|i| i.attr("Id")).filter(|id| !id.is_empty()) else {
            debug!(element = %item.name, "skipping item without ItemId");
            continue;
        };

        let mailbox = item.child("From").and_then(|f| f.child("Mailbox"));
        let mut summary =
            MessageSummary::new(id, parse_timestamp(item.child_text("DateTimeReceived")));
        summary.change_key = item_id
            .and_then(|i| i.attr("ChangeKey"))
            .map(str::to_owned);
        summary.subject = item.child_text("Subject").map(str::to_owned);
        summary.from_name = mailbox.and_then(|m| m.child_text("Name")).map(str::to_owned);
        summary.from_address = mailbox
            .and_then(|m| m.child_text("EmailAddress"))
            .map(str::to_owned);
        summary.sent_at = parse_timestamp(item.child_text("DateTimeSent"));
        summary.has_attachments = parse_bool(item.child_text("HasAttachments")).unwrap_or(false);
        summary.is_read = parse_bool(item.child_text("IsRead"));
        messages.push(summary);
    }
    messages
}

/// Extract file attachment metadata from a `GetItem` response
fn parse_attachment_list(doc: &XmlNode) -> Vec<AttachmentInfo> {
    let Some(attachments) = doc.find("Attachments") else {
        return Vec::new();
    };

    attachments
        .children
        .iter()
        .filter(|a| a.name == "FileAttachment")
        .filter_map(|a| {
            let id = a.child("AttachmentId").and_then(|i| i.attr("Id"))?;
            Some(AttachmentInfo {
                id: id.to_owned(),
                name: a.child_text("Name").map(str::to_owned),
                content_type: a.child_text("ContentType").map(str::to_owned),
                size: a.child_text("Size").and_then(|s| s.parse().ok()),
            })
        })
        .collect()
}

/// Extract the body of the first item in a `GetItem` response
///
/// Items without a body yield an empty text body. The lookup starts at
/// `Items` because the SOAP envelope has its own `Body` element.
fn parse_body(doc: &XmlNode) -> MessageBody {
    let body = doc.find("Items").and_then(|items| items.find("Body"));
    MessageBody {
        body_type: body
            .and_then(|b| b.attr("BodyType"))
            .unwrap_or("Text")
            .to_owned(),
        content: body.map(|b| b.text.clone()).unwrap_or_default(),
    }
}

/// Decode the base64 content of a `GetAttachment` response
fn parse_attachment_content(doc: &XmlNode, attachment_id: &str) -> AppResult<Vec<u8>> {
    let attachment = doc.find("FileAttachment").ok_or_else(|| {
        AppError::NotFound(format!("attachment '{attachment_id}' has no file content"))
    })?;
    let Some(content) = attachment.child("Content") else {
        return Ok(Vec::new());
    };
    let compact: String = content
        .text
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    BASE64
        .decode(compact.as_bytes())
        .map_err(|e| malformed(&format!("attachment content is not base64: {e}")))
}

fn parse_folder(doc: &XmlNode) -> AppResult<FolderInfo> {
    let folder = doc
        .find("Folders")
        .and_then(|f| f.children.first())
        .ok_or_else(|| malformed("GetFolder response has no folder"))?;
    Ok(FolderInfo {
        display_name: folder.child_text("DisplayName").map(str::to_owned),
        total_count: folder.child_text("TotalCount").and_then(|s| s.parse().ok()),
        unread_count: folder.child_text("UnreadCount").and_then(|s| s.parse().ok()),
    })
}

/// Truncate string to maximum characters (Unicode-safe)
fn truncate_chars(input: &str, max_chars: usize) -> String {
    input.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{
        check_response, distinguished_folder_name, envelope, folder_id_xml, parse_attachment_content,
        parse_attachment_list, parse_body, parse_document, parse_find_item, parse_folder,
        soap_action,
    };
    use crate::errors::AppError;

    fn soap(body: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="utf-8"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
  <s:Body xmlns:m="http://schemas.microsoft.com/exchange/services/2006/messages"
          xmlns:t="http://schemas.microsoft.com/exchange/services/2006/types">
    {body}
  </s:Body>
</s:Envelope>"#
        )
    }

    const FIND_ITEM: &str = r#"
<m:FindItemResponse>
  <m:ResponseMessages>
    <m:FindItemResponseMessage ResponseClass="Success">
      <m:ResponseCode>NoError</m:ResponseCode>
      <m:RootFolder TotalItemsInView="3" IncludesLastItemInRange="true">
        <t:Items>
          <t:Message>
            <t:ItemId Id="AAMkADE=" ChangeKey="CQAAABYA"/>
            <t:Subject>Quarterly report &amp; numbers</t:Subject>
            <t:DateTimeReceived>2024-05-02T09:30:00Z</t:DateTimeReceived>
            <t:DateTimeSent>2024-05-02T09:29:55Z</t:DateTimeSent>
            <t:HasAttachments>true</t:HasAttachments>
            <t:From><t:Mailbox><t:Name>Ada</t:Name><t:EmailAddress>ada@example.com</t:EmailAddress></t:Mailbox></t:From>
            <t:IsRead>false</t:IsRead>
          </t:Message>
          <t:MeetingRequest>
            <t:ItemId Id="AAMkADI="/>
            <t:Subject>Sync</t:Subject>
            <t:HasAttachments>false</t:HasAttachments>
          </t:MeetingRequest>
          <t:Message>
            <t:Subject>no id</t:Subject>
          </t:Message>
          <t:Contact>
            <t:ItemId Id="AAMkADM="/>
          </t:Contact>
        </t:Items>
      </m:RootFolder>
    </m:FindItemResponseMessage>
  </m:ResponseMessages>
</m:FindItemResponse>"#;

    #[test]
    fn parses_find_item_messages() {
        let doc = parse_document(&soap(FIND_ITEM)).expect("valid xml");
        check_response(&doc, "FindItem").expect("success response");

        let messages = parse_find_item(&doc);
        assert_eq!(messages.len(), 2);

        let first = &messages[0];
        assert_eq!(first.id, "AAMkADE=");
        assert_eq!(first.change_key.as_deref(), Some("CQAAABYA"));
        assert_eq!(first.subject.as_deref(), Some("Quarterly report & numbers"));
        assert_eq!(
            first.received_at,
            Some(Utc.with_ymd_and_hms(2024, 5, 2, 9, 30, 0).unwrap())
        );
        assert!(first.has_attachments);
        assert_eq!(first.from_name.as_deref(), Some("Ada"));
        assert_eq!(first.from_address.as_deref(), Some("ada@example.com"));
        assert_eq!(first.is_read, Some(false));

        let second = &messages[1];
        assert_eq!(second.id, "AAMkADI=");
        assert_eq!(second.received_at, None);
        assert!(!second.has_attachments);
    }

    #[test]
    fn error_response_class_maps_to_not_found() {
        let xml = soap(
            r#"<m:FindItemResponse><m:ResponseMessages>
                 <m:FindItemResponseMessage ResponseClass="Error">
                   <m:MessageText>The specified folder could not be found in the store.</m:MessageText>
                   <m:ResponseCode>ErrorFolderNotFound</m:ResponseCode>
                 </m:FindItemResponseMessage>
               </m:ResponseMessages></m:FindItemResponse>"#,
        );
        let doc = parse_document(&xml).expect("valid xml");

        let err = check_response(&doc, "FindItem").expect_err("must fail");
        assert!(matches!(err, AppError::NotFound(_)));
        assert!(err.to_string().contains("ErrorFolderNotFound"));
    }

    #[test]
    fn server_busy_is_a_retryable_transport_error() {
        let xml = soap(
            r#"<m:GetItemResponse><m:ResponseMessages>
                 <m:GetItemResponseMessage ResponseClass="Error">
                   <m:ResponseCode>ErrorServerBusy</m:ResponseCode>
                 </m:GetItemResponseMessage>
               </m:ResponseMessages></m:GetItemResponse>"#,
        );
        let doc = parse_document(&xml).expect("valid xml");

        let err = check_response(&doc, "GetItem").expect_err("must fail");
        assert!(err.is_retryable());
    }

    #[test]
    fn soap_fault_is_reported() {
        let xml = soap(
            r#"<s:Fault><faultcode>a:ErrorSchemaValidation</faultcode>
               <faultstring xml:lang="en-US">The request failed schema validation.</faultstring></s:Fault>"#,
        );
        let doc = parse_document(&xml).expect("valid xml");

        let err = check_response(&doc, "FindItem").expect_err("must fail");
        assert!(err.to_string().contains("schema validation"));
    }

    #[test]
    fn parses_file_attachments_only() {
        let xml = soap(
            r#"<m:GetItemResponse><m:ResponseMessages>
                 <m:GetItemResponseMessage ResponseClass="Success">
                   <m:ResponseCode>NoError</m:ResponseCode>
                   <m:Items><t:Message>
                     <t:ItemId Id="AAMkADE="/>
                     <t:Attachments>
                       <t:FileAttachment>
                         <t:AttachmentId Id="att-1"/>
                         <t:Name>report.pdf</t:Name>
                         <t:ContentType>application/pdf</t:ContentType>
                         <t:Size>2048</t:Size>
                       </t:FileAttachment>
                       <t:ItemAttachment>
                         <t:AttachmentId Id="att-2"/>
                         <t:Name>Forwarded</t:Name>
                       </t:ItemAttachment>
                       <t:FileAttachment>
                         <t:AttachmentId Id="att-3"/>
                       </t:FileAttachment>
                     </t:Attachments>
                   </t:Message></m:Items>
                 </m:GetItemResponseMessage>
               </m:ResponseMessages></m:GetItemResponse>"#,
        );
        let doc = parse_document(&xml).expect("valid xml");

        let attachments = parse_attachment_list(&doc);
        assert_eq!(attachments.len(), 2);
        assert_eq!(attachments[0].id, "att-1");
        assert_eq!(attachments[0].name.as_deref(), Some("report.pdf"));
        assert_eq!(attachments[0].content_type.as_deref(), Some("application/pdf"));
        assert_eq!(attachments[0].size, Some(2048));
        assert_eq!(attachments[1].id, "att-3");
        assert_eq!(attachments[1].name, None);
    }

    #[test]
    fn decodes_attachment_content() {
        let xml = soap(
            r#"<m:GetAttachmentResponse><m:ResponseMessages>
                 <m:GetAttachmentResponseMessage ResponseClass="Success">
                   <m:ResponseCode>NoError</m:ResponseCode>
                   <m:Attachments><t:FileAttachment>
                     <t:AttachmentId Id="att-1"/>
                     <t:Name>hello.txt</t:Name>
                     <t:Content>aGVsbG8g
                     d29ybGQ=</t:Content>
                   </t:FileAttachment></m:Attachments>
                 </m:GetAttachmentResponseMessage>
               </m:ResponseMessages></m:GetAttachmentResponse>"#,
        );
        let doc = parse_document(&xml).expect("valid xml");

        let bytes = parse_attachment_content(&doc, "att-1").expect("decodes");
        assert_eq!(bytes, b"hello world");
    }

    #[test]
    fn parses_get_folder() {
        let xml = soap(
            r#"<m:GetFolderResponse><m:ResponseMessages>
                 <m:GetFolderResponseMessage ResponseClass="Success">
                   <m:ResponseCode>NoError</m:ResponseCode>
                   <m:Folders><t:Folder>
                     <t:FolderId Id="AQMkAD=="/>
                     <t:DisplayName>Inbox</t:DisplayName>
                     <t:TotalCount>42</t:TotalCount>
                     <t:UnreadCount>3</t:UnreadCount>
                   </t:Folder></m:Folders>
                 </m:GetFolderResponseMessage>
               </m:ResponseMessages></m:GetFolderResponse>"#,
        );
        let doc = parse_document(&xml).expect("valid xml");

        let folder = parse_folder(&doc).expect("folder present");
        assert_eq!(folder.display_name.as_deref(), Some("Inbox"));
        assert_eq!(folder.total_count, Some(42));
        assert_eq!(folder.unread_count, Some(3));
    }

    #[test]
    fn rejects_truncated_xml() {
        let err = parse_document("<a><b></b>").expect_err("must fail");
        assert!(err.to_string().contains("malformed EWS response"));
    }

    #[test]
    fn folder_reference_uses_distinguished_ids_case_insensitively() {
        assert_eq!(distinguished_folder_name("SentItems"), Some("sentitems"));
        assert_eq!(distinguished_folder_name("Archive"), None);
        assert_eq!(
            folder_id_xml("INBOX"),
            r#"<t:DistinguishedFolderId Id="inbox"/>"#
        );
        assert_eq!(
            folder_id_xml("AAMk\"x"),
            r#"<t:FolderId Id="AAMk&quot;x"/>"#
        );
    }

    #[test]
    fn parses_text_body_of_item() {
        let xml = soap(
            r#"<m:GetItemResponse><m:ResponseMessages>
                 <m:GetItemResponseMessage ResponseClass="Success">
                   <m:ResponseCode>NoError</m:ResponseCode>
                   <m:Items><t:Message>
                     <t:ItemId Id="AAMkADE=" ChangeKey="CQAAABYA"/>
                     <t:Body BodyType="Text" IsTruncated="false">Hi team,
the numbers are attached &amp; final.</t:Body>
                   </t:Message></m:Items>
                 </m:GetItemResponseMessage>
               </m:ResponseMessages></m:GetItemResponse>"#,
        );
        let doc = parse_document(&xml).expect("valid xml");
        check_response(&doc, "GetItem").expect("success response");

        let body = parse_body(&doc);
        assert_eq!(body.body_type, "Text");
        assert_eq!(body.content, "Hi team,\nthe numbers are attached & final.");
    }

    #[test]
    fn item_without_body_yields_empty_text() {
        let xml = soap(
            r#"<m:GetItemResponse><m:ResponseMessages>
                 <m:GetItemResponseMessage ResponseClass="Success">
                   <m:ResponseCode>NoError</m:ResponseCode>
                   <m:Items><t:Message><t:ItemId Id="AAMkADE="/></t:Message></m:Items>
                 </m:GetItemResponseMessage>
               </m:ResponseMessages></m:GetItemResponse>"#,
        );
        let doc = parse_document(&xml).expect("valid xml");

        let body = parse_body(&doc);
        assert_eq!(body.body_type, "Text");
        assert!(body.content.is_empty());
    }

    #[test]
    fn soap_action_names_the_operation() {
        assert_eq!(
            soap_action("GetFolder"),
            "http://schemas.microsoft.com/exchange/services/2006/messages/GetFolder"
        );
    }

    #[test]
    fn envelope_requests_exchange_2010_sp2() {
        let xml = envelope("<m:GetFolder/>");
        assert!(xml.contains(r#"RequestServerVersion Version="Exchange2010_SP2""#));
        parse_document(&xml).expect("envelope is well-formed");
    }
}
