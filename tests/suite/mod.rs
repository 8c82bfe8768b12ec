//! Integration test modules

mod decomposition;
mod oracle_http;
