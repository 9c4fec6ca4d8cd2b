use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Lifecycle status shared by all three queue tables. Scan jobs only use the
/// pending/processing/completed/failed subset; parse adds skipped and ingest
/// adds duplicate.
#[derive(Debug, Clone, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "job_status")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "processing")]
    Processing,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "skipped")]
    Skipped,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "duplicate")]
    Duplicate,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Pending | JobStatus::Processing)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "scan_type")]
pub enum ScanType {
    /// Initial 365-day lookback over the whole inbox.
    #[sea_orm(string_value = "deep_365_day")]
    #[serde(rename = "deep-365-day")]
    Deep365Day,
    /// Scheduled incremental scan over the last 2 days.
    #[sea_orm(string_value = "daily_2_day")]
    #[serde(rename = "daily-2-day")]
    Daily2Day,
    /// User-requested rescan; claimed ahead of scheduled scans.
    #[sea_orm(string_value = "manual")]
    #[serde(rename = "manual")]
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "billing_cycle")]
#[serde(rename_all = "snake_case")]
pub enum BillingCycle {
    #[sea_orm(string_value = "weekly")]
    Weekly,
    #[sea_orm(string_value = "monthly")]
    Monthly,
    #[sea_orm(string_value = "yearly")]
    Yearly,
}

#[derive(Debug, Clone, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "suggestion_status")]
#[serde(rename_all = "snake_case")]
pub enum SuggestionStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "approved")]
    Approved,
    #[sea_orm(string_value = "rejected")]
    Rejected,
    #[sea_orm(string_value = "auto_merged")]
    AutoMerged,
}

#[derive(Debug, Clone, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "integration_status")]
#[serde(rename_all = "snake_case")]
pub enum IntegrationStatus {
    #[sea_orm(string_value = "active")]
    Active,
    #[sea_orm(string_value = "revoked")]
    Revoked,
    #[sea_orm(string_value = "error")]
    Error,
}
