use std::sync::Arc;

use anyhow::{anyhow, Context};
use chrono::{DateTime, TimeZone, Utc};
use leaky_bucket::RateLimiter;
use reqwest::Client as HttpClient;
use serde::Deserialize;

macro_rules! gmail_url {
    ($($part:expr),+) => {{
        const GMAIL_ENDPOINT: &str = "https://www.googleapis.com/gmail/v1/users/me";
        let parts: Vec<&str> = vec![$($part),+];
        format!("{}/{}", GMAIL_ENDPOINT, parts.join("/"))
    }};
}

// Per-user Gmail quota is 250 units/second. Both calls the pipeline makes
// cost 5 units.
const QUOTA_PER_SECOND: usize = 250;
const QUOTA_MESSAGES_LIST: usize = 5;
const QUOTA_MESSAGES_GET: usize = 5;

/// Metadata-only Gmail client scoped to one user's access token.
pub struct GmailClient {
    http_client: HttpClient,
    access_token: String,
    rate_limiter: Arc<RateLimiter>,
}

impl GmailClient {
    pub fn new(http_client: HttpClient, access_token: String) -> Self {
        let rate_limiter = Arc::new(
            RateLimiter::builder()
                .initial(QUOTA_PER_SECOND)
                .interval(std::time::Duration::from_secs(1))
                .refill(QUOTA_PER_SECOND)
                .max(QUOTA_PER_SECOND)
                .build(),
        );
        GmailClient {
            http_client,
            access_token,
            rate_limiter,
        }
    }

    /// Runs `query` against the mailbox and returns up to `max_messages`
    /// message ids, following result pages as needed.
    pub async fn list_message_ids(
        &self,
        query: &str,
        page_size: u32,
        max_messages: usize,
    ) -> anyhow::Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            self.rate_limiter.acquire(QUOTA_MESSAGES_LIST).await;

            let mut params = vec![
                ("q".to_string(), query.to_string()),
                ("maxResults".to_string(), page_size.to_string()),
            ];
            if let Some(token) = &page_token {
                params.push(("pageToken".to_string(), token.clone()));
            }

            let resp = self
                .http_client
                .get(gmail_url!("messages"))
                .bearer_auth(&self.access_token)
                .query(&params)
                .send()
                .await
                .context("gmail messages.list request failed")?;

            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                return Err(anyhow!("gmail messages.list returned {status}: {body}"));
            }

            let page: MessageListPage = resp
                .json()
                .await
                .context("gmail messages.list returned unexpected json")?;

            match append_page(&mut ids, page, max_messages) {
                Some(token) => page_token = Some(token),
                None => return Ok(ids),
            }
        }
    }

    /// Fetches subject, sender, date and snippet for one message without
    /// downloading the body.
    pub async fn get_message_metadata(&self, message_id: &str) -> anyhow::Result<MessageMetadata> {
        self.rate_limiter.acquire(QUOTA_MESSAGES_GET).await;

        let resp = self
            .http_client
            .get(gmail_url!("messages", message_id))
            .bearer_auth(&self.access_token)
            .query(&[
                ("format", "metadata"),
                ("metadataHeaders", "Subject"),
                ("metadataHeaders", "From"),
                ("metadataHeaders", "Date"),
            ])
            .send()
            .await
            .context("gmail messages.get request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!(
                "gmail messages.get for {message_id} returned {status}: {body}"
            ));
        }

        resp.json()
            .await
            .context("gmail messages.get returned unexpected json")
    }
}

/// Collects the page's ids and decides whether to fetch another page. An
/// empty page ends the walk even when Gmail hands back a continuation token.
fn append_page(
    ids: &mut Vec<String>,
    page: MessageListPage,
    max_messages: usize,
) -> Option<String> {
    if page.messages.is_empty() {
        return None;
    }
    for msg in page.messages {
        ids.push(msg.id);
        if ids.len() >= max_messages {
            return None;
        }
    }
    page.next_page_token
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageListPage {
    #[serde(default)]
    messages: Vec<MessageRef>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMetadata {
    pub id: String,
    #[serde(default)]
    pub snippet: String,
    /// Epoch milliseconds, as a string.
    pub internal_date: Option<String>,
    #[serde(default)]
    pub payload: MessagePayload,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessagePayload {
    #[serde(default)]
    pub headers: Vec<MessageHeader>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageHeader {
    pub name: String,
    pub value: String,
}

impl MessageMetadata {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.payload
            .headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    /// Message receipt time. Falls back to now when Gmail omits or mangles
    /// the field.
    pub fn received_at(&self) -> DateTime<Utc> {
        self.internal_date
            .as_deref()
            .and_then(|ms| ms.parse::<i64>().ok())
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or_else(Utc::now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata_fixture() -> MessageMetadata {
        serde_json::from_value(serde_json::json!({
            "id": "18f2a",
            "snippet": "Your subscription has renewed",
            "internalDate": "1709985600000",
            "payload": {
                "headers": [
                    { "name": "Subject", "value": "Netflix receipt" },
                    { "name": "From", "value": "Netflix <info@netflix.com>" },
                ]
            }
        }))
        .unwrap()
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let meta = metadata_fixture();
        assert_eq!(meta.header("subject"), Some("Netflix receipt"));
        assert_eq!(meta.header("FROM"), Some("Netflix <info@netflix.com>"));
        assert_eq!(meta.header("Date"), None);
    }

    #[test]
    fn received_at_parses_internal_date_millis() {
        let meta = metadata_fixture();
        assert_eq!(
            meta.received_at(),
            Utc.with_ymd_and_hms(2024, 3, 9, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn empty_list_page_deserializes() {
        let page: MessageListPage = serde_json::from_str("{\"resultSizeEstimate\":0}").unwrap();
        assert!(page.messages.is_empty());
        assert!(page.next_page_token.is_none());
    }

    fn page(ids: &[&str], token: Option<&str>) -> MessageListPage {
        MessageListPage {
            messages: ids.iter().map(|id| MessageRef { id: id.to_string() }).collect(),
            next_page_token: token.map(str::to_string),
        }
    }

    #[test]
    fn empty_page_with_token_ends_the_walk() {
        let mut ids = vec!["a".to_string()];
        assert_eq!(append_page(&mut ids, page(&[], Some("tok")), 100), None);
        assert_eq!(ids, vec!["a".to_string()]);
    }

    #[test]
    fn page_walk_follows_tokens_and_honors_the_cap() {
        let mut ids = Vec::new();
        assert_eq!(
            append_page(&mut ids, page(&["a", "b"], Some("tok")), 100),
            Some("tok".to_string())
        );
        assert_eq!(append_page(&mut ids, page(&["c", "d"], Some("tok2")), 3), None);
        assert_eq!(ids, vec!["a", "b", "c"]);
    }
}
