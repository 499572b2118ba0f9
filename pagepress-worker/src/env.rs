//! Spawn-time environment contract
//!
//! The pool passes a worker its entire configuration through environment
//! variables; this module parses them into a typed [`WorkerEnv`].

use std::collections::BTreeMap;
use std::path::PathBuf;

use pagepress_core::env as vars;
use pagepress_core::env::WorkerMode;
use pagepress_core::task::ConverterKind;
use thiserror::Error;

const DEFAULT_MAX_LOG_ENTRY_SIZE: usize = 1000;

#[derive(Debug, Error)]
pub enum EnvError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {message}")]
    Invalid { name: &'static str, message: String },
}

#[derive(Debug, Clone)]
pub struct WorkerEnv {
    pub worker_id: String,
    pub mode: WorkerMode,
    pub port: Option<u16>,
    pub debug: bool,
    pub converter: ConverterKind,
    pub engine_path: Option<PathBuf>,
    pub engine_switches: BTreeMap<String, Option<String>>,
    pub allow_local_files: bool,
    pub max_log_entry_size: usize,
}

impl WorkerEnv {
    pub fn from_env() -> Result<Self, EnvError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, EnvError> {
        let worker_id = get(vars::WORKER_ID).unwrap_or_else(|| "0".to_string());

        let mode = match get(vars::WORKER_MODE) {
            Some(value) => value.parse::<WorkerMode>().map_err(|message| {
                EnvError::Invalid {
                    name: vars::WORKER_MODE,
                    message,
                }
            })?,
            None => WorkerMode::Pipe,
        };

        let port = match get(vars::WORKER_PORT) {
            Some(value) => Some(value.parse::<u16>().map_err(|err| EnvError::Invalid {
                name: vars::WORKER_PORT,
                message: err.to_string(),
            })?),
            None => None,
        };
        if mode == WorkerMode::Http && port.is_none() {
            return Err(EnvError::Missing(vars::WORKER_PORT));
        }

        let converter = match get(vars::CONVERTER) {
            Some(value) => value.parse::<ConverterKind>().map_err(|message| {
                EnvError::Invalid {
                    name: vars::CONVERTER,
                    message,
                }
            })?,
            None => ConverterKind::Chromium,
        };

        let engine_switches = match get(vars::ENGINE_SWITCHES) {
            Some(value) => {
                serde_json::from_str(&value).map_err(|err| EnvError::Invalid {
                    name: vars::ENGINE_SWITCHES,
                    message: err.to_string(),
                })?
            }
            None => BTreeMap::new(),
        };

        let max_log_entry_size = match get(vars::MAX_LOG_ENTRY_SIZE) {
            Some(value) => value.parse::<usize>().map_err(|err| EnvError::Invalid {
                name: vars::MAX_LOG_ENTRY_SIZE,
                message: err.to_string(),
            })?,
            None => DEFAULT_MAX_LOG_ENTRY_SIZE,
        };

        Ok(Self {
            worker_id,
            mode,
            port,
            debug: get(vars::DEBUG).is_some(),
            converter,
            engine_path: get(vars::ENGINE_PATH).map(PathBuf::from),
            engine_switches,
            allow_local_files: get(vars::ALLOW_LOCAL_FILES).as_deref() == Some("true"),
            max_log_entry_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_with(pairs: &[(&str, &str)]) -> Result<WorkerEnv, EnvError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WorkerEnv::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn minimal_environment_defaults_to_pipe_mode() {
        let env = env_with(&[]).unwrap();
        assert_eq!(env.worker_id, "0");
        assert_eq!(env.mode, WorkerMode::Pipe);
        assert_eq!(env.converter, ConverterKind::Chromium);
        assert_eq!(env.max_log_entry_size, 1000);
        assert!(!env.debug);
        assert!(!env.allow_local_files);
    }

    #[test]
    fn full_environment_is_parsed() {
        let env = env_with(&[
            (vars::WORKER_ID, "3"),
            (vars::WORKER_MODE, "http"),
            (vars::WORKER_PORT, "39131"),
            (vars::DEBUG, "1"),
            (vars::CONVERTER, "markup"),
            (vars::ENGINE_SWITCHES, r#"{"disable-gpu":null,"lang":"en"}"#),
            (vars::ALLOW_LOCAL_FILES, "true"),
            (vars::MAX_LOG_ENTRY_SIZE, "128"),
        ])
        .unwrap();
        assert_eq!(env.worker_id, "3");
        assert_eq!(env.mode, WorkerMode::Http);
        assert_eq!(env.port, Some(39131));
        assert!(env.debug);
        assert_eq!(env.converter, ConverterKind::Markup);
        assert_eq!(env.engine_switches.len(), 2);
        assert_eq!(
            env.engine_switches.get("lang"),
            Some(&Some("en".to_string()))
        );
        assert!(env.allow_local_files);
        assert_eq!(env.max_log_entry_size, 128);
    }

    #[test]
    fn http_mode_requires_a_port() {
        let err = env_with(&[(vars::WORKER_MODE, "http")]).unwrap_err();
        assert!(matches!(err, EnvError::Missing(name) if name == vars::WORKER_PORT));
    }

    #[test]
    fn bad_switches_json_is_rejected() {
        let err = env_with(&[(vars::ENGINE_SWITCHES, "not-json")]).unwrap_err();
        assert!(matches!(err, EnvError::Invalid { .. }));
    }
}
