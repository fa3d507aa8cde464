// Library interface for serendipity modules
// This allows tests and the binary to import modules

pub mod aggregate;
pub mod catalog;
pub mod classify;
pub mod cluster;
pub mod digest;
pub mod error;
pub mod gateway;
pub mod llm;
pub mod models;
pub mod normalize;
pub mod registration;
pub mod server;
pub mod sessions;
