pub mod app;
pub mod auth;
pub mod calendar;
pub mod clock;
pub mod compactor;
pub mod config;
pub mod engine;
pub mod http;
pub mod model;
pub mod notify;
pub mod observability;
pub mod reminder;
pub mod store;
pub mod templates;
pub mod wal;
