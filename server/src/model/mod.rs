pub mod device;
pub mod integration;
pub mod scan_history;
pub mod subscription;
pub mod suggestion;
