//! A small static file server: one thread per connection, `GET` only, and one access log line
//! per request.

pub mod access_log;
pub mod config;
pub mod connection;
pub mod daemon;
pub mod date;
pub mod request;
pub mod resolve;
pub mod response;
pub mod server;

pub use config::Config;
