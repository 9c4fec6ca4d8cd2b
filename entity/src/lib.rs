pub mod prelude;

pub mod device;
pub mod queue_ingest;
pub mod queue_parse;
pub mod queue_scan;
pub mod scan_history;
pub mod sea_orm_active_enums;
pub mod subscription;
pub mod subscription_suggestion;
pub mod user_integration;
