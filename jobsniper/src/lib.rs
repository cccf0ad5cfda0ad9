// Library interface for jobsniper modules
// This allows tests and the diagnostic binaries to import modules

pub mod error;
pub mod filter;
pub mod ingestion;
pub mod llm;
pub mod model;
pub mod notify;
pub mod poller;
pub mod storage;
