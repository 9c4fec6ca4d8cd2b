//! Search query construction for the scan stage.

use chrono::{DateTime, Duration, Utc};
use entity::sea_orm_active_enums::ScanType;

use crate::server_config::ScanConfig;

/// Domains of services known to send subscription mail. Matching senders are
/// pulled in regardless of subject line.
pub const KNOWN_SENDERS: [&str; 20] = [
    "netflix.com",
    "spotify.com",
    "adobe.com",
    "microsoft.com",
    "apple.com",
    "amazon.com",
    "github.com",
    "digitalocean.com",
    "aws.amazon.com",
    "google.com",
    "dropbox.com",
    "zoom.us",
    "slack.com",
    "notion.so",
    "figma.com",
    "canva.com",
    "grammarly.com",
    "evernote.com",
    "trello.com",
    "asana.com",
];

/// Subject keywords that widen the net to unknown senders.
pub const SUBJECT_KEYWORDS: [&str; 12] = [
    "subscription",
    "billed monthly",
    "billed annually",
    "recurring payment",
    "auto-renewal",
    "membership fee",
    "monthly charge",
    "annual charge",
    "payment confirmation",
    "invoice",
    "receipt",
    "your payment",
];

pub fn lookback_days(scan_type: &ScanType, cfg: &ScanConfig) -> i64 {
    match scan_type {
        ScanType::Daily2Day => cfg.incremental_lookback_days,
        ScanType::Deep365Day | ScanType::Manual => cfg.deep_lookback_days,
    }
}

/// Builds the full Gmail search expression for one scan job. Spam and the
/// promotions tab are always excluded.
pub fn build_search_query(scan_type: &ScanType, now: DateTime<Utc>, cfg: &ScanConfig) -> String {
    let after = (now - Duration::days(lookback_days(scan_type, cfg)))
        .format("%Y/%m/%d")
        .to_string();

    let senders = KNOWN_SENDERS
        .iter()
        .map(|domain| format!("from:{domain}"))
        .collect::<Vec<_>>()
        .join(" OR ");

    let keywords = SUBJECT_KEYWORDS
        .iter()
        .map(|kw| format!("\"{kw}\""))
        .collect::<Vec<_>>()
        .join(" OR ");

    format!("({senders}) OR subject:({keywords}) -in:spam -in:promotions after:{after}")
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn scan_config() -> ScanConfig {
        ScanConfig {
            max_messages: 500,
            page_size: 100,
            fetch_batch_size: 50,
            fetch_delay_ms: 100,
            deep_lookback_days: 365,
            incremental_lookback_days: 2,
        }
    }

    #[test]
    fn daily_scan_uses_short_lookback() {
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap();
        let query = build_search_query(&ScanType::Daily2Day, now, &scan_config());
        assert!(query.ends_with("after:2025/03/08"));
    }

    #[test]
    fn deep_and_manual_scans_look_back_a_year() {
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap();
        let cfg = scan_config();
        let deep = build_search_query(&ScanType::Deep365Day, now, &cfg);
        let manual = build_search_query(&ScanType::Manual, now, &cfg);
        assert!(deep.ends_with("after:2024/03/10"));
        assert!(manual.ends_with("after:2024/03/10"));
    }

    #[test]
    fn query_combines_senders_keywords_and_exclusions() {
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap();
        let query = build_search_query(&ScanType::Deep365Day, now, &scan_config());
        assert!(query.starts_with("(from:netflix.com OR "));
        assert!(query.contains("from:asana.com)"));
        assert!(query.contains("OR subject:(\"subscription\" OR "));
        assert!(query.contains("\"your payment\")"));
        assert!(query.contains("-in:spam -in:promotions"));
    }
}
