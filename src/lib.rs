pub mod approval;
pub mod config;
pub mod context;
pub mod conversation;
pub mod driver;
pub mod engine;
pub mod errors;
pub mod logging;
pub mod quorum_config;
pub mod store;
pub mod tools;
