//! Shared types for the pagepress conversion pipeline
//!
//! This crate holds the data model exchanged between the orchestrating side
//! and the worker processes (conversion settings, task output, log records)
//! plus the startup lifecycle gate. It performs no I/O of its own.

pub mod env;
pub mod lifecycle;
pub mod task;

pub use lifecycle::{StartError, StartGate};
pub use task::{
    ConversionSettings, ConverterKind, LogLevel, LogRecord, PdfOptions, TaskFailure, TaskOutput,
};
