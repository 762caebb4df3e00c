pub mod cache;
pub mod catalog;
pub mod config;
pub mod embedding;
pub mod errors;
pub mod logging;
pub mod search;
pub mod semantic;
pub mod server;
pub mod store;
