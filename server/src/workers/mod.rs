pub mod ingest;
pub mod notify;
pub mod parse;
pub mod scan;
