//! Deterministic keyword scorer. No network, no model; every decision is
//! reproducible from the message text alone.

use once_cell::sync::Lazy;
use regex::Regex;

use entity::sea_orm_active_enums::BillingCycle;

use crate::classify::{CandidateMessage, Classification};
use crate::gmail::query::KNOWN_SENDERS;

// Scoring increments. High-signal keywords count once no matter how many
// match; the rest are presence checks.
const SCORE_HIGH_KEYWORD: f32 = 0.4;
const SCORE_MEDIUM_KEYWORD: f32 = 0.2;
const SCORE_BILLING_CYCLE: f32 = 0.15;
const SCORE_PRICE_PATTERN: f32 = 0.15;
const SCORE_KNOWN_SENDER: f32 = 0.2;
const SCORE_NEGATIVE: f32 = 0.3;

/// Below this base score the message is declared a non-subscription before
/// any extraction runs.
const MIN_SUBSCRIPTION_SCORE: f32 = 0.3;

// Extraction bonuses, applied on top of the base score.
const BONUS_SERVICE_NAME: f32 = 0.1;
const BONUS_PRICE: f32 = 0.1;
const BONUS_BILLING_CYCLE: f32 = 0.05;
const MAX_CONFIDENCE: f32 = 0.95;

const HIGH_KEYWORDS: [&str; 7] = [
    "subscription renewed",
    "subscription payment",
    "recurring payment",
    "auto-renewal",
    "membership renewal",
    "billed monthly",
    "billed annually",
];

const MEDIUM_KEYWORDS: [&str; 7] = [
    "subscription",
    "invoice",
    "receipt",
    "payment confirmation",
    "your payment",
    "charged",
    "membership fee",
];

const NEGATIVE_KEYWORDS: [&str; 6] = [
    "free trial",
    "order confirmation",
    "order shipped",
    "password reset",
    "verify your email",
    "has been cancelled",
];

const WEEKLY_WORDS: [&str; 4] = ["weekly", "per week", "/week", "every week"];
const MONTHLY_WORDS: [&str; 5] = ["monthly", "per month", "/month", "/mo", "every month"];
const YEARLY_WORDS: [&str; 6] = [
    "yearly",
    "annually",
    "annual",
    "per year",
    "/year",
    "every year",
];

// Ordered by reliability. Symbol-prefixed amounts win over currency-code
// amounts, which win over context-keyword amounts.
static PRICE_SYMBOL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([$₹€£¥])\s*([0-9][0-9,]*(?:\.[0-9]{1,2})?)").unwrap());
static PRICE_CODE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b([0-9][0-9,]*(?:\.[0-9]{1,2})?)\s*(USD|INR|EUR|GBP|JPY)\b").unwrap()
});
static PRICE_CONTEXT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:amount|price|total|charged|payment of|paid)\s*[:\-]?\s*([0-9][0-9,]*(?:\.[0-9]{1,2})?)")
        .unwrap()
});
static PRICE_INVOICE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:invoice|bill)\D{0,20}?([0-9][0-9,]*\.[0-9]{1,2})\b").unwrap()
});

static SENDER_ADDRESS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:\x22?([^<\x22]*?)\x22?\s*)?<?([^<>\s]+@[^<>\s]+)>?\s*$").unwrap());

// An amount is plausible when it lies strictly between zero and this cap.
const MAX_PRICE: f64 = 50_000.0;

const GENERIC_NAME_WORDS: [&str; 10] = [
    "team", "support", "billing", "noreply", "no-reply", "the", "inc", "llc", "mail", "your",
];

const GENERIC_MAIL_DOMAINS: [&str; 7] = [
    "gmail.com",
    "yahoo.com",
    "outlook.com",
    "hotmail.com",
    "aol.com",
    "icloud.com",
    "mail.com",
];

pub struct HeuristicClassifier {
    min_confidence: f32,
}

impl HeuristicClassifier {
    pub fn new(min_confidence: f32) -> Self {
        HeuristicClassifier { min_confidence }
    }

    pub fn min_confidence(&self) -> f32 {
        self.min_confidence
    }

    pub fn classify(&self, msg: &CandidateMessage<'_>) -> Classification {
        let text = format!("{} {}", msg.subject, msg.snippet);
        let text_lower = text.to_lowercase();

        let score = subscription_score(&text_lower, msg.sender);
        if score < MIN_SUBSCRIPTION_SCORE {
            return Classification::not_subscription(score);
        }

        let service_name = extract_service_name(msg.sender, msg.subject);
        let price = extract_price(&text);
        let currency = extract_currency(&text);
        let billing_cycle = extract_billing_cycle(&text_lower);

        let mut confidence = score;
        if service_name.is_some() {
            confidence += BONUS_SERVICE_NAME;
        }
        if price.is_some() {
            confidence += BONUS_PRICE;
        }
        if billing_cycle.is_some() {
            confidence += BONUS_BILLING_CYCLE;
        }

        Classification {
            is_subscription: true,
            service_name,
            price,
            currency,
            billing_cycle,
            confidence: confidence.min(MAX_CONFIDENCE),
        }
    }
}

/// Base likelihood that the message concerns a recurring payment, clamped to
/// [0, 1]. `text_lower` must already be lowercased.
pub fn subscription_score(text_lower: &str, sender: &str) -> f32 {
    let mut score = 0.0;

    if HIGH_KEYWORDS.iter().any(|kw| text_lower.contains(kw)) {
        score += SCORE_HIGH_KEYWORD;
    }
    if MEDIUM_KEYWORDS.iter().any(|kw| text_lower.contains(kw)) {
        score += SCORE_MEDIUM_KEYWORD;
    }
    if extract_billing_cycle(text_lower).is_some() {
        score += SCORE_BILLING_CYCLE;
    }
    if extract_price(text_lower).is_some() {
        score += SCORE_PRICE_PATTERN;
    }
    if sender_domain_is_known(sender) {
        score += SCORE_KNOWN_SENDER;
    }
    if NEGATIVE_KEYWORDS.iter().any(|kw| text_lower.contains(kw)) {
        score -= SCORE_NEGATIVE;
    }

    score.clamp(0.0, 1.0)
}

fn sender_domain_is_known(sender: &str) -> bool {
    let sender = sender.to_lowercase();
    KNOWN_SENDERS.iter().any(|domain| sender.contains(domain))
}

/// Service name from the sender's display name, then the sender domain, then
/// capitalized subject tokens.
pub fn extract_service_name(sender: &str, subject: &str) -> Option<String> {
    if let Some(caps) = SENDER_ADDRESS_RE.captures(sender.trim()) {
        if let Some(display) = caps.get(1) {
            if let Some(name) = clean_display_name(display.as_str()) {
                return Some(name);
            }
        }
        if let Some(address) = caps.get(2) {
            if let Some(name) = name_from_domain(address.as_str()) {
                return Some(name);
            }
        }
    } else if let Some(name) = clean_display_name(sender) {
        // bare display name with no address part
        return Some(name);
    }

    name_from_subject(subject)
}

fn clean_display_name(display: &str) -> Option<String> {
    let cleaned = display
        .split_whitespace()
        .filter(|word| {
            let w = word.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase();
            !w.is_empty() && !GENERIC_NAME_WORDS.contains(&w.as_str())
        })
        .collect::<Vec<_>>()
        .join(" ");
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

fn name_from_domain(address: &str) -> Option<String> {
    let domain = address.rsplit('@').next()?.to_lowercase();
    if GENERIC_MAIL_DOMAINS.contains(&domain.as_str()) {
        return None;
    }
    let label = domain.split('.').next()?;
    if label.is_empty() {
        return None;
    }
    let mut chars = label.chars();
    let first = chars.next()?;
    Some(first.to_uppercase().collect::<String>() + chars.as_str())
}

fn name_from_subject(subject: &str) -> Option<String> {
    subject
        .split_whitespace()
        .map(|word| word.trim_matches(|c: char| !c.is_alphanumeric()))
        .find(|word| {
            word.chars().next().is_some_and(char::is_uppercase)
                && word.len() > 1
                && !GENERIC_NAME_WORDS.contains(&word.to_lowercase().as_str())
        })
        .map(str::to_string)
}

/// First plausible monetary amount in the text, trying the patterns in
/// reliability order.
pub fn extract_price(text: &str) -> Option<f64> {
    let candidates = [
        PRICE_SYMBOL_RE.captures(text).and_then(|c| c.get(2)),
        PRICE_CODE_RE.captures(text).and_then(|c| c.get(1)),
        PRICE_CONTEXT_RE.captures(text).and_then(|c| c.get(1)),
        PRICE_INVOICE_RE.captures(text).and_then(|c| c.get(1)),
    ];

    candidates
        .into_iter()
        .flatten()
        .filter_map(|m| m.as_str().replace(',', "").parse::<f64>().ok())
        .find(|&value| value > 0.0 && value < MAX_PRICE)
}

pub fn extract_currency(text: &str) -> Option<String> {
    if let Some(caps) = PRICE_SYMBOL_RE.captures(text) {
        let code = match caps.get(1).map(|m| m.as_str()) {
            Some("$") => "USD",
            Some("₹") => "INR",
            Some("€") => "EUR",
            Some("£") => "GBP",
            Some("¥") => "JPY",
            _ => return None,
        };
        return Some(code.to_string());
    }
    PRICE_CODE_RE
        .captures(text)
        .and_then(|caps| caps.get(2))
        .map(|m| m.as_str().to_uppercase())
}

pub fn extract_billing_cycle(text_lower: &str) -> Option<BillingCycle> {
    if WEEKLY_WORDS.iter().any(|w| text_lower.contains(w)) {
        Some(BillingCycle::Weekly)
    } else if YEARLY_WORDS.iter().any(|w| text_lower.contains(w)) {
        Some(BillingCycle::Yearly)
    } else if MONTHLY_WORDS.iter().any(|w| text_lower.contains(w)) {
        Some(BillingCycle::Monthly)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> HeuristicClassifier {
        HeuristicClassifier::new(0.6)
    }

    #[test]
    fn extracts_price_currency_and_cycle_with_field_bonuses() {
        let msg = CandidateMessage {
            subject: "Netflix charged $15.99 monthly",
            snippet: "",
            sender: "Netflix <info@netflix.com>",
        };
        let result = classifier().classify(&msg);

        assert!(result.is_subscription);
        assert_eq!(result.service_name.as_deref(), Some("Netflix"));
        assert_eq!(result.price, Some(15.99));
        assert_eq!(result.currency.as_deref(), Some("USD"));
        assert_eq!(result.billing_cycle, Some(BillingCycle::Monthly));

        let base = subscription_score("netflix charged $15.99 monthly ", msg.sender);
        let expected =
            (base + BONUS_SERVICE_NAME + BONUS_PRICE + BONUS_BILLING_CYCLE).min(MAX_CONFIDENCE);
        assert_eq!(result.confidence, expected);
        assert!(result.confidence > base);
    }

    #[test]
    fn low_scoring_message_is_rejected_before_extraction() {
        let msg = CandidateMessage {
            subject: "Lunch on Friday?",
            snippet: "Are you free around noon",
            sender: "A Friend <friend@gmail.com>",
        };
        let result = classifier().classify(&msg);
        assert!(!result.is_subscription);
        assert!(result.confidence < 0.3);
        assert_eq!(result.service_name, None);
        assert_eq!(result.price, None);
    }

    #[test]
    fn negative_keywords_pull_the_score_down() {
        let with_negative = subscription_score("your order confirmation receipt", "shop@example.com");
        let without = subscription_score("receipt", "shop@example.com");
        assert!(with_negative < without);
    }

    #[test]
    fn high_keywords_count_once() {
        let one = subscription_score("recurring payment", "x@example.com");
        let two = subscription_score("recurring payment auto-renewal", "x@example.com");
        assert_eq!(one, two);
    }

    #[test]
    fn score_never_leaves_unit_interval() {
        let loaded = "subscription renewed recurring payment invoice receipt $9.99 monthly";
        assert!(subscription_score(loaded, "info@netflix.com") <= 1.0);
        let hostile = "free trial order confirmation password reset";
        assert!(subscription_score(hostile, "x@example.com") >= 0.0);
    }

    #[test]
    fn price_prefers_symbol_over_context_number() {
        let text = "Invoice 42981 total: $12.50";
        assert_eq!(extract_price(text), Some(12.50));
    }

    #[test]
    fn price_accepts_currency_code_suffix() {
        assert_eq!(extract_price("You paid 499.00 INR for Premium"), Some(499.0));
        assert_eq!(extract_currency("You paid 499.00 INR for Premium").as_deref(), Some("INR"));
    }

    #[test]
    fn price_strips_thousands_separators() {
        assert_eq!(extract_price("charged ₹1,299.00 today"), Some(1299.0));
    }

    #[test]
    fn implausible_amounts_are_ignored() {
        assert_eq!(extract_price("order #$99999999"), None);
        assert_eq!(extract_price("pay $50000 for enterprise"), None);
        assert_eq!(extract_price("your $0 trial continues"), None);
    }

    #[test]
    fn small_amounts_are_still_prices() {
        assert_eq!(extract_price("charged $0.25 this week"), Some(0.25));
    }

    #[test]
    fn service_name_falls_back_from_display_name_to_domain() {
        assert_eq!(
            extract_service_name("billing@spotify.com", "Your receipt"),
            Some("Spotify".to_string())
        );
    }

    #[test]
    fn generic_display_words_are_stripped() {
        assert_eq!(
            extract_service_name("The Dropbox Team <no-reply@dropbox.com>", "Receipt"),
            Some("Dropbox".to_string())
        );
    }

    #[test]
    fn generic_mail_domain_falls_back_to_subject() {
        assert_eq!(
            extract_service_name("someone@gmail.com", "Your Acme invoice"),
            Some("Acme".to_string())
        );
    }

    #[test]
    fn billing_cycle_keywords_map_to_cycles() {
        assert_eq!(extract_billing_cycle("billed weekly"), Some(BillingCycle::Weekly));
        assert_eq!(extract_billing_cycle("$9.99/month"), Some(BillingCycle::Monthly));
        assert_eq!(
            extract_billing_cycle("annual membership"),
            Some(BillingCycle::Yearly)
        );
        assert_eq!(extract_billing_cycle("one-time purchase"), None);
    }
}
