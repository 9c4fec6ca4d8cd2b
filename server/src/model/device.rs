use uuid::Uuid;

use crate::db_core::prelude::*;
use crate::error::AppResult;

pub struct DeviceCtrl;

impl DeviceCtrl {
    /// Push tokens for every device the user is currently signed in on.
    pub async fn logged_in_tokens(
        conn: &DatabaseConnection,
        user_id: Uuid,
    ) -> AppResult<Vec<String>> {
        let tokens = Device::find()
            .filter(device::Column::UserId.eq(user_id))
            .filter(device::Column::LoggedIn.eq(true))
            .all(conn)
            .await?
            .into_iter()
            .map(|d| d.device_token)
            .collect();
        Ok(tokens)
    }
}
