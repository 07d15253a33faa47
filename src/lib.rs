// Library exports for unattach crate
// This allows tests and other crates to use the modules

pub mod attachment_parser;
pub mod config;
pub mod driver;
pub mod email;
pub mod error;
pub mod filename;
pub mod gmail_client;
pub mod labels;
pub mod mail_api;
pub mod query;
pub mod runner;
pub mod scheduler;

// Step-wise search and process tasks
pub mod task;

// Loopback OAuth sign-in
pub mod oauth;
