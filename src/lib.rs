// Engine core
pub mod bridge;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod types;

// State components
pub mod dedup;
pub mod registry;
pub mod staging;

// Fan-out and external seams
pub mod automation;
pub mod broadcast;
pub mod server;
