pub mod config;
pub mod credential;
pub mod error;
pub mod persist;
pub mod remote;
pub mod scheduler;
pub mod shutdown;
