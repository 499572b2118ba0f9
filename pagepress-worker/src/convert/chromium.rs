//! Headless Chromium print engine
//!
//! Drives an external Chromium binary as the opaque print collaborator: load
//! the page, `--print-to-pdf`, read the buffer back. The engine run dies with
//! the worker process, which is what makes a timeout cancellation effective.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use pagepress_core::task::{ConversionSettings, ConverterKind, LogLevel};
use tokio::process::Command;

use crate::context::TaskContext;
use crate::convert::pdf;
use crate::convert::{Converter, RenderFailure, RenderOutput};

const DEFAULT_BINARY: &str = "chromium";

pub struct ChromiumConverter {
    binary: PathBuf,
    switches: BTreeMap<String, Option<String>>,
    allow_local_files: bool,
}

impl ChromiumConverter {
    pub fn new(
        binary: Option<PathBuf>,
        switches: BTreeMap<String, Option<String>>,
        allow_local_files: bool,
    ) -> Self {
        Self {
            binary: binary.unwrap_or_else(|| PathBuf::from(DEFAULT_BINARY)),
            switches,
            allow_local_files,
        }
    }
}

#[async_trait]
impl Converter for ChromiumConverter {
    fn kind(&self) -> ConverterKind {
        ConverterKind::Chromium
    }

    async fn warm_up(&self) -> Result<(), RenderFailure> {
        let output = Command::new(&self.binary)
            .arg("--version")
            .output()
            .await
            .map_err(|err| {
                RenderFailure::engine(format!(
                    "engine binary {} is not usable: {}",
                    self.binary.display(),
                    err
                ))
            })?;
        if output.status.success() {
            Ok(())
        } else {
            Err(RenderFailure::engine(format!(
                "engine binary {} exited with {} during warm up",
                self.binary.display(),
                output.status
            )))
        }
    }

    async fn render_to_output(
        &self,
        settings: &ConversionSettings,
        ctx: &mut TaskContext,
    ) -> Result<RenderOutput, RenderFailure> {
        let url = resolve_page_url(settings, self.allow_local_files)?;

        if settings.wait_for_js {
            // headless print runs have no hook for the page's ready signal
            ctx.log(
                LogLevel::Warn,
                format!(
                    "the chromium engine cannot observe the {} signal; printing without it",
                    settings.wait_for_js_var_name
                ),
            );
        }
        if let Some(delay) = settings.delay_ms {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let output_file = tempfile::Builder::new()
            .prefix("pagepress-")
            .suffix(".pdf")
            .tempfile()?;

        let mut command = Command::new(&self.binary);
        command
            .arg("--headless")
            .arg("--disable-gpu")
            .arg(format!("--print-to-pdf={}", output_file.path().display()));
        if let Some(user_agent) = &settings.user_agent {
            ctx.log(
                LogLevel::Debug,
                format!("setting up custom user agent: {}", user_agent),
            );
            command.arg(format!("--user-agent={}", user_agent));
        }
        if !settings.extra_headers.is_empty() {
            // the CLI bridge has no way to attach request headers
            ctx.log(
                LogLevel::Warn,
                "the chromium engine ignores extra request headers",
            );
        }
        for (name, value) in &self.switches {
            match value {
                Some(value) => command.arg(format!("--{}={}", name, value)),
                None => command.arg(format!("--{}", name)),
            };
        }
        command.arg(&url);

        ctx.log(
            LogLevel::Debug,
            format!(
                "pdf options: {}",
                serde_json::to_string(&settings.pdf).unwrap_or_default()
            ),
        );
        ctx.log(LogLevel::Debug, "before printing..");

        let output = command.output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = format!(
                "rendering engine exited with {}: {}",
                output.status,
                stderr.trim()
            );
            ctx.page_error(message.clone(), None);
            return Err(RenderFailure::engine(message));
        }
        ctx.log(LogLevel::Debug, "after printing..");

        let data = tokio::fs::read(output_file.path()).await?;
        let page_count = pdf::count_pages(&data);
        ctx.log(LogLevel::Debug, "pdf parsing complete..");

        Ok(RenderOutput { data, page_count })
    }
}

fn resolve_page_url(
    settings: &ConversionSettings,
    allow_local_files: bool,
) -> Result<String, RenderFailure> {
    if let Some(url) = &settings.url {
        if url.starts_with("file:") && !allow_local_files {
            return Err(RenderFailure::engine(
                "local file access is disabled for this worker",
            ));
        }
        return Ok(url.clone());
    }
    let html = settings
        .html
        .as_deref()
        .ok_or_else(|| RenderFailure::engine("conversion settings carry neither html nor url"))?;
    Ok(format!("data:text/html;base64,{}", BASE64.encode(html)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_html_becomes_a_data_url() {
        let settings = ConversionSettings::from_html("<p>hi</p>");
        let url = resolve_page_url(&settings, false).unwrap();
        assert!(url.starts_with("data:text/html;base64,"));
        let decoded = BASE64
            .decode(url.trim_start_matches("data:text/html;base64,"))
            .unwrap();
        assert_eq!(decoded, b"<p>hi</p>");
    }

    #[test]
    fn file_urls_require_local_access() {
        let settings = ConversionSettings {
            url: Some("file:///etc/passwd".to_string()),
            ..ConversionSettings::default()
        };
        assert!(resolve_page_url(&settings, false).is_err());
        assert!(resolve_page_url(&settings, true).is_ok());
    }

    #[test]
    fn settings_without_a_document_are_rejected() {
        let settings = ConversionSettings::default();
        assert!(resolve_page_url(&settings, false).is_err());
    }
}
