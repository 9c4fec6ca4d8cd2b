//! Chat-completion classification strategy.

use anyhow::anyhow;
use indoc::formatdoc;
use reqwest::Client as HttpClient;
use serde::Deserialize;
use serde_json::json;

use entity::sea_orm_active_enums::BillingCycle;

use crate::classify::{CandidateMessage, Classification};
use crate::error::{AppError, AppResult};
use crate::server_config::ModelConfig;

pub struct ModelClassifier {
    http_client: HttpClient,
    api_key: String,
    cfg: ModelConfig,
    min_confidence: f32,
}

impl ModelClassifier {
    pub fn new(
        http_client: HttpClient,
        api_key: String,
        cfg: ModelConfig,
        min_confidence: f32,
    ) -> Self {
        ModelClassifier {
            http_client,
            api_key,
            cfg,
            min_confidence,
        }
    }

    pub fn min_confidence(&self) -> f32 {
        self.min_confidence
    }

    /// One completion call per message. Any transport, quota or parse
    /// failure surfaces as an error so the job can be retried rather than
    /// silently skipped.
    pub async fn classify(&self, msg: &CandidateMessage<'_>) -> AppResult<Classification> {
        let body = json!({
            "model": self.cfg.id,
            "temperature": self.cfg.temperature,
            "max_tokens": self.cfg.max_tokens,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": classification_prompt(msg) },
            ],
        });

        let resp = self
            .http_client
            .post(&self.cfg.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(AppError::Internal(anyhow!(
                "completion endpoint returned {status}: {text}"
            )));
        }

        let completion: ChatCompletionResponse = resp.json().await?;
        let content = completion
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| AppError::Internal(anyhow!("completion response had no choices")))?;

        parse_model_answer(content)
    }
}

const SYSTEM_PROMPT: &str = "You are a precise email classifier. \
    Respond with a single JSON object and nothing else.";

fn classification_prompt(msg: &CandidateMessage<'_>) -> String {
    formatdoc! {r#"
        Decide whether this email concerns a paid recurring subscription.

        From: {sender}
        Subject: {subject}
        Snippet: {snippet}

        Reply with JSON of this exact shape:
        {{
          "is_subscription": boolean,
          "service_name": string or null,
          "price": number or null,
          "currency": ISO 4217 code string or null,
          "billing_cycle": "weekly" | "monthly" | "yearly" | null,
          "confidence": number between 0 and 1
        }}

        Rules:
        - Promotional offers, trials and one-off purchases are not subscriptions.
        - Extract the amount actually charged, not crossed-out or promotional prices.
        - Leave any field you cannot determine null rather than guessing.
    "#,
        sender = msg.sender,
        subject = msg.subject,
        snippet = msg.snippet,
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ModelAnswer {
    is_subscription: bool,
    service_name: Option<String>,
    price: Option<f64>,
    currency: Option<String>,
    billing_cycle: Option<String>,
    confidence: f32,
}

fn parse_model_answer(content: &str) -> AppResult<Classification> {
    let answer: ModelAnswer = serde_json::from_str(content.trim())
        .map_err(|err| AppError::Internal(anyhow!("model reply was not the expected JSON: {err}")))?;

    let billing_cycle = answer
        .billing_cycle
        .as_deref()
        .and_then(|cycle| match cycle.to_lowercase().as_str() {
            "weekly" => Some(BillingCycle::Weekly),
            "monthly" => Some(BillingCycle::Monthly),
            "yearly" | "annually" | "annual" => Some(BillingCycle::Yearly),
            _ => None,
        });

    Ok(Classification {
        is_subscription: answer.is_subscription,
        service_name: answer.service_name,
        price: answer.price,
        currency: answer.currency.map(|c| c.to_uppercase()),
        billing_cycle,
        confidence: answer.confidence.clamp(0.0, 1.0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_includes_message_fields_and_schema() {
        let msg = CandidateMessage {
            subject: "Your Spotify receipt",
            snippet: "Premium, $9.99",
            sender: "Spotify <no-reply@spotify.com>",
        };
        let prompt = classification_prompt(&msg);
        assert!(prompt.contains("Subject: Your Spotify receipt"));
        assert!(prompt.contains("From: Spotify <no-reply@spotify.com>"));
        assert!(prompt.contains("\"is_subscription\": boolean"));
        assert!(prompt.contains("\"billing_cycle\": \"weekly\" | \"monthly\" | \"yearly\" | null"));
    }

    #[test]
    fn well_formed_answer_maps_to_classification() {
        let content = r#"{
            "is_subscription": true,
            "service_name": "Spotify",
            "price": 9.99,
            "currency": "usd",
            "billing_cycle": "Monthly",
            "confidence": 0.92
        }"#;
        let c = parse_model_answer(content).unwrap();
        assert!(c.is_subscription);
        assert_eq!(c.service_name.as_deref(), Some("Spotify"));
        assert_eq!(c.currency.as_deref(), Some("USD"));
        assert_eq!(c.billing_cycle, Some(BillingCycle::Monthly));
        assert_eq!(c.confidence, 0.92);
    }

    #[test]
    fn unknown_cycle_becomes_none_instead_of_erroring() {
        let content = r#"{
            "is_subscription": true,
            "service_name": "Acme",
            "price": 5.0,
            "currency": "USD",
            "billing_cycle": "quarterly",
            "confidence": 0.8
        }"#;
        let c = parse_model_answer(content).unwrap();
        assert_eq!(c.billing_cycle, None);
    }

    #[test]
    fn prose_reply_is_an_error() {
        assert!(parse_model_answer("Sure! Here is the JSON you asked for").is_err());
    }

    #[test]
    fn out_of_range_confidence_is_clamped() {
        let content = r#"{
            "is_subscription": false,
            "service_name": null,
            "price": null,
            "currency": null,
            "billing_cycle": null,
            "confidence": 1.7
        }"#;
        let c = parse_model_answer(content).unwrap();
        assert_eq!(c.confidence, 1.0);
    }
}
