pub mod app_router;
pub mod connect;
pub mod hooks;
