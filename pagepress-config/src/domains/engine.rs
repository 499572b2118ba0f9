//! Rendering engine configuration

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use pagepress_core::task::ConverterKind;

use crate::error::ConfigResult;
use crate::validation::Validatable;

pub const WORKER_EXECUTABLE_NAME: &str = "pagepress-worker";

/// Rendering engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Path to the worker executable. When unset, a `pagepress-worker`
    /// binary next to the current executable is used.
    pub worker_executable: Option<PathBuf>,

    /// Default converter for tasks that carry no override.
    pub converter: ConverterKind,

    /// Path to the browser engine binary used by the chromium converter.
    pub engine_path: Option<PathBuf>,

    /// Engine command-line switches; a `None` value means a bare flag.
    pub command_line_switches: BTreeMap<String, Option<String>>,

    /// Allow pages to load `file://` resources.
    #[serde(default = "crate::domains::utils::default_false")]
    pub allow_local_files_access: bool,

    /// Keep worker processes alive and visible for inspection.
    #[serde(default = "crate::domains::utils::default_false")]
    pub debug_mode: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_executable: None,
            converter: ConverterKind::Chromium,
            engine_path: None,
            command_line_switches: BTreeMap::new(),
            allow_local_files_access: false,
            debug_mode: false,
        }
    }
}

impl EngineConfig {
    /// Resolve the worker executable: the explicit path when configured,
    /// otherwise a sibling of the current executable.
    pub fn resolve_worker_executable(&self) -> ConfigResult<PathBuf> {
        if let Some(path) = &self.worker_executable {
            return Ok(path.clone());
        }
        let current = std::env::current_exe().map_err(|err| {
            self.validation_error(format!("cannot locate the current executable: {}", err))
        })?;
        let sibling = current.with_file_name(WORKER_EXECUTABLE_NAME);
        if sibling.exists() {
            Ok(sibling)
        } else {
            Err(self.validation_error(format!(
                "worker_executable is not set and {} was not found",
                sibling.display()
            )))
        }
    }
}

impl Validatable for EngineConfig {
    fn validate(&self) -> ConfigResult<()> {
        if let Some(path) = &self.worker_executable {
            if path.as_os_str().is_empty() {
                return Err(self.validation_error("worker_executable cannot be empty"));
            }
        }
        for name in self.command_line_switches.keys() {
            if name.is_empty() || name.starts_with('-') {
                return Err(self.validation_error(format!(
                    "command line switch '{}' must be a bare name without leading dashes",
                    name
                )));
            }
        }
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "engine"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.converter, ConverterKind::Chromium);
        assert!(!config.allow_local_files_access);
        assert!(!config.debug_mode);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn dashed_switch_names_are_rejected() {
        let mut config = EngineConfig::default();
        config
            .command_line_switches
            .insert("--disable-gpu".to_string(), None);
        assert!(config.validate().is_err());
    }

    #[test]
    fn explicit_worker_executable_wins() {
        let config = EngineConfig {
            worker_executable: Some(PathBuf::from("/opt/pagepress/pagepress-worker")),
            ..Default::default()
        };
        assert_eq!(
            config.resolve_worker_executable().unwrap(),
            PathBuf::from("/opt/pagepress/pagepress-worker")
        );
    }
}
