// Syslog drain: RFC 5424 over HTTP to a structured logging backend.

// Core pipeline
pub mod handler;
pub mod sink;
pub mod error;

// Process wiring
pub mod backend;
pub mod config;
pub mod runtime;

pub use handler::Drain;
pub use sink::{PathSinks, Sink, SinkProvider, StaticSinks};
