pub mod prelude {
    pub use entity::prelude::*;
    pub use entity::sea_orm_active_enums::*;
    pub use entity::{
        device, queue_ingest, queue_parse, queue_scan, scan_history, subscription,
        subscription_suggestion, user_integration,
    };
    pub use sea_orm::entity::prelude::*;
    pub use sea_orm::sea_query::OnConflict;
    pub use sea_orm::{
        Condition, DatabaseConnection, DbBackend, FromQueryResult, Set, Statement,
    };
}
