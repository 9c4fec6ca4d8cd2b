//! Message classification for the parse stage.
//!
//! Two interchangeable strategies produce the same `Classification` shape:
//! a deterministic keyword scorer and a hosted chat-completion model. The
//! strategy and its acceptance threshold are picked from configuration at
//! startup.

use reqwest::Client as HttpClient;

use entity::sea_orm_active_enums::BillingCycle;

use crate::error::AppResult;
use crate::server_config::{ParseConfig, ParseStrategy};

pub mod heuristic;
pub mod model;

pub use heuristic::HeuristicClassifier;
pub use model::ModelClassifier;

/// The fields a parse job exposes to a classifier. Metadata only; bodies are
/// never fetched.
#[derive(Debug, Clone, Copy)]
pub struct CandidateMessage<'a> {
    pub subject: &'a str,
    pub snippet: &'a str,
    pub sender: &'a str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub is_subscription: bool,
    pub service_name: Option<String>,
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub billing_cycle: Option<BillingCycle>,
    pub confidence: f32,
}

impl Classification {
    pub fn not_subscription(confidence: f32) -> Self {
        Classification {
            is_subscription: false,
            service_name: None,
            price: None,
            currency: None,
            billing_cycle: None,
            confidence,
        }
    }
}

pub enum Classifier {
    Heuristic(HeuristicClassifier),
    Model(ModelClassifier),
}

impl Classifier {
    pub fn from_config(
        cfg: &ParseConfig,
        http_client: HttpClient,
        api_key: Option<String>,
    ) -> anyhow::Result<Classifier> {
        match cfg.strategy {
            ParseStrategy::Heuristic => Ok(Classifier::Heuristic(HeuristicClassifier::new(
                cfg.heuristic_min_confidence,
            ))),
            ParseStrategy::Model => {
                let api_key =
                    api_key.ok_or_else(|| anyhow::anyhow!("model strategy requires an api key"))?;
                Ok(Classifier::Model(ModelClassifier::new(
                    http_client,
                    api_key,
                    cfg.model.clone(),
                    cfg.model_min_confidence,
                )))
            }
        }
    }

    pub async fn classify(&self, msg: &CandidateMessage<'_>) -> AppResult<Classification> {
        match self {
            Classifier::Heuristic(h) => Ok(h.classify(msg)),
            Classifier::Model(m) => m.classify(msg).await,
        }
    }

    pub fn min_confidence(&self) -> f32 {
        match self {
            Classifier::Heuristic(h) => h.min_confidence(),
            Classifier::Model(m) => m.min_confidence(),
        }
    }
}

/// Why a classified message was skipped rather than ingested. The variant
/// text is persisted on the parse job row.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    NotSubscription,
    LowConfidence(f32),
    MissingFields,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::NotSubscription => write!(f, "Not a subscription"),
            SkipReason::LowConfidence(c) => write!(f, "Low confidence: {c}"),
            SkipReason::MissingFields => write!(f, "Missing required fields"),
        }
    }
}

/// A classification that passed the acceptance gate, with the fields the
/// ingest stage needs made non-optional.
#[derive(Debug, Clone, PartialEq)]
pub struct AcceptedExtraction {
    pub service_name: String,
    pub price: f64,
    pub currency: String,
    pub billing_cycle: BillingCycle,
    pub confidence: f32,
}

const DEFAULT_CURRENCY: &str = "INR";

/// Decides whether a classification proceeds to ingest. Confidence exactly
/// at the threshold is accepted. Missing currency falls back to the default;
/// missing name, price or cycle does not.
pub fn acceptance_gate(
    c: &Classification,
    min_confidence: f32,
) -> Result<AcceptedExtraction, SkipReason> {
    if !c.is_subscription {
        return Err(SkipReason::NotSubscription);
    }
    if c.confidence < min_confidence {
        return Err(SkipReason::LowConfidence(c.confidence));
    }

    let (Some(service_name), Some(price), Some(billing_cycle)) =
        (c.service_name.as_ref(), c.price, c.billing_cycle.clone())
    else {
        return Err(SkipReason::MissingFields);
    };

    Ok(AcceptedExtraction {
        service_name: service_name.clone(),
        price,
        currency: c
            .currency
            .clone()
            .unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
        billing_cycle,
        confidence: c.confidence,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accepted(confidence: f32) -> Classification {
        Classification {
            is_subscription: true,
            service_name: Some("Spotify".to_string()),
            price: Some(9.99),
            currency: Some("USD".to_string()),
            billing_cycle: Some(BillingCycle::Monthly),
            confidence,
        }
    }

    #[test]
    fn confidence_exactly_at_threshold_is_accepted() {
        let result = acceptance_gate(&accepted(0.6), 0.6);
        assert!(result.is_ok());
    }

    #[test]
    fn confidence_just_below_threshold_is_skipped() {
        let c = accepted(0.6 - f32::EPSILON);
        assert_eq!(
            acceptance_gate(&c, 0.6),
            Err(SkipReason::LowConfidence(c.confidence))
        );
    }

    #[test]
    fn non_subscription_skips_before_threshold_check() {
        let c = Classification::not_subscription(0.99);
        assert_eq!(acceptance_gate(&c, 0.6), Err(SkipReason::NotSubscription));
    }

    #[test]
    fn missing_price_is_a_missing_fields_skip() {
        let mut c = accepted(0.9);
        c.price = None;
        assert_eq!(acceptance_gate(&c, 0.6), Err(SkipReason::MissingFields));
    }

    #[test]
    fn missing_currency_falls_back_to_default() {
        let mut c = accepted(0.9);
        c.currency = None;
        let extraction = acceptance_gate(&c, 0.6).unwrap();
        assert_eq!(extraction.currency, "INR");
    }

    #[test]
    fn skip_reasons_render_their_persisted_text() {
        assert_eq!(SkipReason::NotSubscription.to_string(), "Not a subscription");
        assert_eq!(
            SkipReason::LowConfidence(0.45).to_string(),
            "Low confidence: 0.45"
        );
        assert_eq!(
            SkipReason::MissingFields.to_string(),
            "Missing required fields"
        );
    }
}
