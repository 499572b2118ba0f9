//! Environment variable contract between the pool and its worker processes
//!
//! Worker processes receive their whole configuration through these variables
//! at spawn time; there is no CLI surface.

use std::fmt;
use std::str::FromStr;

pub const WORKER_ID: &str = "PAGEPRESS_WORKER_ID";
pub const WORKER_MODE: &str = "PAGEPRESS_WORKER_MODE";
pub const WORKER_PORT: &str = "PAGEPRESS_WORKER_PORT";
pub const DEBUG: &str = "PAGEPRESS_DEBUG";
pub const CONVERTER: &str = "PAGEPRESS_CONVERTER";
pub const ENGINE_PATH: &str = "PAGEPRESS_ENGINE_PATH";
pub const ENGINE_SWITCHES: &str = "PAGEPRESS_ENGINE_SWITCHES";
pub const ALLOW_LOCAL_FILES: &str = "PAGEPRESS_ALLOW_LOCAL_FILES";
pub const MAX_LOG_ENTRY_SIZE: &str = "PAGEPRESS_MAX_LOG_ENTRY_SIZE";

/// How a worker process serves conversion tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerMode {
    /// Framed messages over the stdio pipe.
    Pipe,
    /// Local HTTP endpoint, one conversion per request.
    Http,
}

impl WorkerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerMode::Pipe => "pipe",
            WorkerMode::Http => "http",
        }
    }
}

impl fmt::Display for WorkerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkerMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pipe" => Ok(WorkerMode::Pipe),
            "http" => Ok(WorkerMode::Http),
            other => Err(format!("unknown worker mode '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_mode_round_trips() {
        assert_eq!("pipe".parse::<WorkerMode>().unwrap(), WorkerMode::Pipe);
        assert_eq!("http".parse::<WorkerMode>().unwrap(), WorkerMode::Http);
        assert_eq!(WorkerMode::Http.as_str(), "http");
        assert!("tcp".parse::<WorkerMode>().is_err());
    }
}
