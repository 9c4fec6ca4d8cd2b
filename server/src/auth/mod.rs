pub mod jwt;
pub mod oauth;
