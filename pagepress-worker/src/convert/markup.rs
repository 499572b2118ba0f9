//! Deterministic markup engine
//!
//! Renders inline HTML without a browser: pages split on an explicit
//! `<pagebreak/>` marker. Used by the test suite and for local development
//! where a real engine binary is unavailable. `wait_for_js` parks forever
//! because no script host exists to raise the ready signal, which makes
//! timeout behavior exercisable end to end.

use async_trait::async_trait;
use pagepress_core::task::{ConversionSettings, ConverterKind, LogLevel};
use std::time::Duration;

use crate::context::TaskContext;
use crate::convert::{Converter, RenderFailure, RenderOutput};

pub const PAGE_BREAK_MARKER: &str = "<pagebreak/>";

#[derive(Default)]
pub struct MarkupConverter;

impl MarkupConverter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Converter for MarkupConverter {
    fn kind(&self) -> ConverterKind {
        ConverterKind::Markup
    }

    async fn render_to_output(
        &self,
        settings: &ConversionSettings,
        ctx: &mut TaskContext,
    ) -> Result<RenderOutput, RenderFailure> {
        let html = settings
            .html
            .as_deref()
            .ok_or_else(|| RenderFailure::engine("markup converter requires inline html"))?;

        if let Some(delay) = settings.delay_ms {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        if settings.wait_for_js {
            ctx.log(
                LogLevel::Debug,
                format!("waiting for {} signal..", settings.wait_for_js_var_name),
            );
            // no script host exists in this engine, so the signal never fires
            std::future::pending::<()>().await;
        }

        let pages: Vec<&str> = html.split(PAGE_BREAK_MARKER).collect();
        let mut rendered = Vec::with_capacity(pages.len());
        for (index, page) in pages.iter().enumerate() {
            ctx.page_log(
                LogLevel::Info,
                format!("rendered page {}: {}", index + 1, strip_tags(page)),
            );
            let mut block = String::new();
            if let Some(header) = &settings.header {
                block.push_str(header);
                block.push('\n');
            }
            block.push_str(page);
            if let Some(footer) = &settings.footer {
                block.push('\n');
                block.push_str(footer);
            }
            rendered.push(block);
        }

        let data = rendered.join("\n\u{c}\n").into_bytes();
        Ok(RenderOutput {
            data,
            page_count: pages.len() as u32,
        })
    }
}

fn strip_tags(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            ch if !in_tag => text.push(ch),
            _ => {}
        }
    }
    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logs::LogStore;
    use tokio::sync::mpsc;

    fn context() -> TaskContext {
        let (tx, _rx) = mpsc::unbounded_channel();
        TaskContext::new("0".to_string(), 1, LogStore::new(true, 1000), tx)
    }

    #[tokio::test]
    async fn page_breaks_produce_multiple_pages() {
        let converter = MarkupConverter::new();
        let settings = ConversionSettings::from_html("<h1>aa</h1><pagebreak/><h1>bb</h1>");
        let mut ctx = context();

        let output = converter
            .render_to_output(&settings, &mut ctx)
            .await
            .unwrap();
        assert_eq!(output.page_count, 2);

        let text = String::from_utf8(output.data).unwrap();
        assert!(text.contains("<h1>aa</h1>"));
        assert!(text.contains("<h1>bb</h1>"));
    }

    #[tokio::test]
    async fn single_page_without_markers() {
        let converter = MarkupConverter::new();
        let settings = ConversionSettings::from_html("<p>only one</p>");
        let mut ctx = context();

        let output = converter
            .render_to_output(&settings, &mut ctx)
            .await
            .unwrap();
        assert_eq!(output.page_count, 1);
    }

    #[tokio::test]
    async fn page_logs_are_emitted_in_order() {
        let converter = MarkupConverter::new();
        let settings = ConversionSettings::from_html("<h1>a</h1><pagebreak/><h1>b</h1>");
        let mut ctx = context();

        converter
            .render_to_output(&settings, &mut ctx)
            .await
            .unwrap();
        let logs = ctx.into_logs();
        assert_eq!(logs.len(), 2);
        assert!(logs[0].message.contains("page 1: a"));
        assert!(logs[1].message.contains("page 2: b"));
        assert!(logs.iter().all(|record| record.user_level));
    }

    #[tokio::test]
    async fn header_and_footer_wrap_every_page() {
        let converter = MarkupConverter::new();
        let settings = ConversionSettings {
            header: Some("<div>top</div>".to_string()),
            footer: Some("<div>bottom</div>".to_string()),
            ..ConversionSettings::from_html("<p>1</p><pagebreak/><p>2</p>")
        };
        let mut ctx = context();

        let output = converter
            .render_to_output(&settings, &mut ctx)
            .await
            .unwrap();
        let text = String::from_utf8(output.data).unwrap();
        assert_eq!(text.matches("<div>top</div>").count(), 2);
        assert_eq!(text.matches("<div>bottom</div>").count(), 2);
    }

    #[tokio::test]
    async fn missing_html_is_an_engine_error() {
        let converter = MarkupConverter::new();
        let settings = ConversionSettings::default();
        let mut ctx = context();

        let err = converter
            .render_to_output(&settings, &mut ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, RenderFailure::Engine(_)));
    }

    #[tokio::test]
    async fn wait_for_js_never_completes_without_a_signal() {
        let converter = MarkupConverter::new();
        let settings = ConversionSettings {
            wait_for_js: true,
            ..ConversionSettings::from_html("<p>never</p>")
        };
        let mut ctx = context();

        let render = converter.render_to_output(&settings, &mut ctx);
        let outcome = tokio::time::timeout(Duration::from_millis(50), render).await;
        assert!(outcome.is_err());
    }

    #[test]
    fn tag_stripping() {
        assert_eq!(strip_tags("<h1>title</h1>"), "title");
        assert_eq!(strip_tags("plain"), "plain");
        assert_eq!(strip_tags("<br/>"), "");
    }
}
