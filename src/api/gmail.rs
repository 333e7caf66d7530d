//! Gmail API v1: finds statement emails and downloads their PDF attachments.

use crate::api::http::{ensure_success, send_with_retry, RetryPolicy};
use crate::api::{Document, DocumentFilter, Fetch, TokenProvider};
use crate::error::PipelineError;
use crate::{utils, Result};
use anyhow::Context;
use base64::Engine;
use chrono::DateTime;
use serde::Deserialize;
use std::path::PathBuf;
use tracing::{debug, info, warn};

const MESSAGES_URL: &str = "https://gmail.googleapis.com/gmail/v1/users/me/messages";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageListResponse {
    #[serde(default)]
    messages: Vec<MessageStub>,
}

#[derive(Debug, Deserialize)]
struct MessageStub {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageDetail {
    id: String,
    /// Milliseconds since the epoch, as a string.
    #[serde(default)]
    internal_date: Option<String>,
    #[serde(default)]
    payload: Option<MessagePart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessagePart {
    #[serde(default)]
    filename: String,
    #[serde(default)]
    headers: Vec<Header>,
    #[serde(default)]
    body: Option<PartBody>,
    #[serde(default)]
    parts: Vec<MessagePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PartBody {
    #[serde(default)]
    attachment_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Header {
    #[serde(default)]
    name: String,
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct AttachmentBody {
    data: String,
}

/// A PDF attachment found in a message.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Attachment {
    filename: String,
    attachment_id: String,
}

/// Fetches statement PDFs from Gmail and keeps a copy of each in the downloads directory.
pub(crate) struct GmailFetch {
    client: reqwest::Client,
    token_provider: TokenProvider,
    downloads: PathBuf,
    policy: RetryPolicy,
}

impl GmailFetch {
    pub(crate) fn new(token_provider: TokenProvider, downloads: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::new(),
            token_provider,
            downloads: downloads.into(),
            policy: RetryPolicy::default(),
        })
    }

    async fn list_message_ids(&mut self, filter: &DocumentFilter) -> Result<Vec<String>> {
        let query = build_query(filter);
        info!("Searching Gmail for: {query}");
        let token = self.token_provider.token_with_refresh().await?.to_string();
        let response = send_with_retry(
            self.client
                .get(MESSAGES_URL)
                .bearer_auth(&token)
                .query(&[("q", query.as_str()), ("maxResults", &filter.max_results.to_string())]),
            &self.policy,
        )
        .await?;
        let list: MessageListResponse = ensure_success(response, "Gmail message search")
            .await?
            .json()
            .await
            .context("Unable to parse the Gmail message list")?;
        Ok(list.messages.into_iter().map(|m| m.id).collect())
    }

    async fn fetch_message(&mut self, id: &str) -> Result<Vec<Document>> {
        let token = self.token_provider.token_with_refresh().await?.to_string();
        let response = send_with_retry(
            self.client
                .get(format!("{MESSAGES_URL}/{id}"))
                .bearer_auth(&token)
                .query(&[("format", "full")]),
            &self.policy,
        )
        .await?;
        let message: MessageDetail = ensure_success(response, "Gmail message fetch")
            .await?
            .json()
            .await
            .context("Unable to parse the Gmail message")?;

        let payload = message.payload.unwrap_or_default();
        let subject = header(&payload, "Subject").unwrap_or_default().to_string();
        let sender = sender_address(header(&payload, "From").unwrap_or_default());
        let date = message
            .internal_date
            .as_deref()
            .and_then(|ms| ms.parse::<i64>().ok())
            .and_then(DateTime::from_timestamp_millis)
            .map(|dt| dt.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "unknown-date".to_string());

        let mut attachments = Vec::new();
        collect_pdf_attachments(&payload, &mut attachments);
        if attachments.is_empty() {
            debug!("Message {} '{subject}' has no PDF attachment", message.id);
        }

        let mut documents = Vec::with_capacity(attachments.len());
        for attachment in attachments {
            let bytes = self.download(&message.id, &attachment.attachment_id).await?;
            let name = sanitize_filename(&format!(
                "{date}_{sender}_{subject}_{}",
                attachment.filename
            ));
            utils::write(self.downloads.join(&name), &bytes).await?;
            info!("Downloaded {name}");
            documents.push(Document {
                source_ref: name,
                context: subject.clone(),
                bytes,
            });
        }
        Ok(documents)
    }

    async fn download(&mut self, message_id: &str, attachment_id: &str) -> Result<Vec<u8>> {
        let token = self.token_provider.token_with_refresh().await?.to_string();
        let response = send_with_retry(
            self.client
                .get(format!(
                    "{MESSAGES_URL}/{message_id}/attachments/{attachment_id}"
                ))
                .bearer_auth(&token),
            &self.policy,
        )
        .await?;
        let body: AttachmentBody = ensure_success(response, "Gmail attachment download")
            .await?
            .json()
            .await
            .context("Unable to parse the Gmail attachment")?;
        decode_attachment(&body.data)
    }
}

#[async_trait::async_trait]
impl Fetch for GmailFetch {
    async fn list_matching_documents(&mut self, filter: &DocumentFilter) -> Result<Vec<Document>> {
        let ids = self
            .list_message_ids(filter)
            .await
            .map_err(|e| PipelineError::FetchUnavailable(format!("{e:#}")))?;
        info!("Found {} matching message(s)", ids.len());

        utils::make_dir(&self.downloads).await?;
        utils::empty_dir(&self.downloads).await?;

        let mut documents = Vec::new();
        for id in ids {
            match self.fetch_message(&id).await {
                Ok(mut docs) => documents.append(&mut docs),
                Err(e) => warn!("Skipping message {id}: {e:#}"),
            }
        }
        Ok(documents)
    }
}

/// Builds the Gmail search expression for `filter`.
fn build_query(filter: &DocumentFilter) -> String {
    let mut query = format!(
        "has:attachment filename:pdf newer_than:{}d",
        filter.lookback_days
    );
    let subjects: Vec<String> = filter
        .subjects
        .iter()
        .filter(|s| !s.trim().is_empty())
        .map(|s| format!("\"{}\"", s.trim()))
        .collect();
    if !subjects.is_empty() {
        query.push_str(&format!(" subject:({})", subjects.join(" OR ")));
    }
    if let Some(sender) = filter.sender.as_deref().filter(|s| !s.is_empty()) {
        query.push_str(&format!(" from:{sender}"));
    }
    query
}

fn header<'a>(part: &'a MessagePart, name: &str) -> Option<&'a str> {
    part.headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

/// `Bank Alerts <alerts@bank.example>` becomes `alerts@bank.example`.
fn sender_address(from: &str) -> String {
    match (from.find('<'), from.rfind('>')) {
        (Some(start), Some(end)) if start < end => from[start + 1..end].to_string(),
        _ => from.trim().to_string(),
    }
}

fn collect_pdf_attachments(part: &MessagePart, out: &mut Vec<Attachment>) {
    if part.filename.to_lowercase().ends_with(".pdf") {
        if let Some(id) = part.body.as_ref().and_then(|b| b.attachment_id.clone()) {
            out.push(Attachment {
                filename: part.filename.clone(),
                attachment_id: id,
            });
        }
    }
    for child in &part.parts {
        collect_pdf_attachments(child, out);
    }
}

/// Gmail sends attachment data as URL-safe base64, sometimes padded.
fn decode_attachment(data: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(data.trim_end_matches('='))
        .context("Unable to decode the attachment data")
}

/// Keeps letters, digits, `.`, `-`, `_` and `@`; everything else becomes `_`.
fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '@') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MailSettings;
    use crate::model::Period;

    #[test]
    fn test_build_query() {
        let mail = MailSettings {
            sender: Some("alerts@bank.example".to_string()),
            subjects: vec!["Credit Card Statement".to_string(), " ".to_string()],
            lookback_days: 10,
            max_results: 5,
        };
        let filter = DocumentFilter::new(Period::new(2025, 3).unwrap(), &mail);
        assert_eq!(
            "has:attachment filename:pdf newer_than:10d subject:(\"Credit Card Statement\") \
             from:alerts@bank.example",
            build_query(&filter)
        );
    }

    #[test]
    fn test_sender_and_sanitize() {
        assert_eq!(
            "alerts@bank.example",
            sender_address("Bank Alerts <alerts@bank.example>")
        );
        assert_eq!("x@y.z", sender_address(" x@y.z "));
        assert_eq!(
            "2025-03-01_x@y.z_Your_statement__March__stmt.pdf",
            sanitize_filename("2025-03-01_x@y.z_Your statement (March)_stmt.pdf")
        );
    }

    #[test]
    fn test_collect_nested_pdf_attachments() {
        let message: MessageDetail = serde_json::from_str(
            r#"{
                "id": "m1",
                "internalDate": "1740787200000",
                "payload": {
                    "headers": [{"name": "subject", "value": "Statement"}],
                    "parts": [
                        {"filename": "", "body": {"size": 10}},
                        {"filename": "", "parts": [
                            {"filename": "Stmt.PDF", "body": {"attachmentId": "a1"}},
                            {"filename": "logo.png", "body": {"attachmentId": "a2"}}
                        ]}
                    ]
                }
            }"#,
        )
        .unwrap();
        let payload = message.payload.unwrap();
        assert_eq!(Some("Statement"), header(&payload, "Subject"));
        let mut found = Vec::new();
        collect_pdf_attachments(&payload, &mut found);
        assert_eq!(
            vec![Attachment {
                filename: "Stmt.PDF".to_string(),
                attachment_id: "a1".to_string()
            }],
            found
        );
    }

    #[test]
    fn test_decode_attachment() {
        assert_eq!(b"%PDF-1".to_vec(), decode_attachment("JVBERi0x").unwrap());
        assert_eq!(b"hi?".to_vec(), decode_attachment("aGk_").unwrap());
        assert_eq!(b"a".to_vec(), decode_attachment("YQ==").unwrap());
    }
}
