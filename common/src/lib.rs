// Request replay toolkit: find platform requests, restore or download their
// files over SFTP, and re-trigger their processing

pub mod batch;
pub mod config;
pub mod credentials;
pub mod db;
pub mod errors;
pub mod manager;
pub mod models;
pub mod remote;
pub mod retry;
pub mod telemetry;
pub mod workflow;

pub use manager::RequestManager;
pub use workflow::CommonWorkflows;
