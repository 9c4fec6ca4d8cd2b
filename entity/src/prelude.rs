pub use super::device::Entity as Device;
pub use super::queue_ingest::Entity as QueueIngest;
pub use super::queue_parse::Entity as QueueParse;
pub use super::queue_scan::Entity as QueueScan;
pub use super::scan_history::Entity as ScanHistory;
pub use super::subscription::Entity as Subscription;
pub use super::subscription_suggestion::Entity as SubscriptionSuggestion;
pub use super::user_integration::Entity as UserIntegration;
