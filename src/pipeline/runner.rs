//! One digest run: fetch → enrich → digest → history → deliver.
//!
//! History is written before delivery, so a delivery failure never loses
//! the batch. Source and history failures end the run; delivery failures
//! are reported in the `RunReport`.

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{error, info, warn};

use crate::config::PipelineConfig;
use crate::digest::{Digest, render_html, render_text};
use crate::error::PipelineError;
use crate::history::{HistoryRecord, HistoryStore};
use crate::pipeline::enricher::Enricher;
use crate::pipeline::types::{MessageSource, Notifier};

/// How the rendered digest left the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryStatus {
    Delivered,
    /// Notifier is disabled.
    Skipped,
    Failed(String),
}

/// Outcome of a completed run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_date: NaiveDate,
    pub fetched: usize,
    pub rows_appended: usize,
    /// Messages whose category came from the fallback.
    pub defaulted: usize,
    pub text: String,
    pub html: String,
    pub delivery: DeliveryStatus,
}

impl RunReport {
    /// 0 for a completed run, 2 when only delivery failed.
    pub fn exit_code(&self) -> i32 {
        match self.delivery {
            DeliveryStatus::Failed(_) => 2,
            DeliveryStatus::Delivered | DeliveryStatus::Skipped => 0,
        }
    }
}

/// Wires the collaborators of a run together.
pub struct DigestPipeline {
    source: Arc<dyn MessageSource>,
    enricher: Enricher,
    history: HistoryStore,
    notifier: Arc<dyn Notifier>,
    config: PipelineConfig,
}

impl DigestPipeline {
    pub fn new(
        source: Arc<dyn MessageSource>,
        enricher: Enricher,
        history: HistoryStore,
        notifier: Arc<dyn Notifier>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            source,
            enricher,
            history,
            notifier,
            config,
        }
    }

    /// Run once. Rows are dated `run_date`.
    pub async fn run(&self, run_date: NaiveDate) -> Result<RunReport, PipelineError> {
        let raw = self
            .source
            .fetch_recent(self.config.max_count, self.config.window)
            .await
            .inspect_err(|e| error!(source = self.source.name(), error = %e, "Fetch failed"))?;
        info!(source = self.source.name(), count = raw.len(), "Fetched messages");

        let enriched = self.enricher.enrich_batch(raw).await;
        let fetched = enriched.len();
        let defaulted = enriched.iter().filter(|m| m.defaulted).count();
        if defaulted > 0 {
            warn!(defaulted, "Some messages fell back to the default category");
        }

        let records: Vec<HistoryRecord> = enriched
            .iter()
            .map(|m| HistoryRecord::from_enriched(m, run_date))
            .collect();

        let digest = Digest::build(enriched, self.config.window);
        let text = render_text(&digest, self.config.text_cap);
        let subject = format!("Daily Email Digest ({})", digest.window_label());
        let html = render_html(&digest, &format!("📬 {subject}"), self.config.html_cap);

        if let Some(path) = &self.config.digest_path {
            match tokio::fs::write(path, &text).await {
                Ok(()) => info!(path = %path.display(), "Digest written"),
                Err(e) => warn!(path = %path.display(), error = %e, "Could not write digest file"),
            }
        }

        let rows_appended = self
            .history
            .append_records_async(records)
            .await
            .inspect_err(|e| {
                error!(
                    path = %self.history.path().display(),
                    unwritten = e.unwritten().len(),
                    error = %e,
                    "History append failed"
                )
            })?;

        let delivery = if self.notifier.is_enabled() {
            match self.notifier.deliver(&subject, &html, &text).await {
                Ok(()) => DeliveryStatus::Delivered,
                Err(e) => {
                    error!(notifier = self.notifier.name(), error = %e, "Digest delivery failed");
                    DeliveryStatus::Failed(e.to_string())
                }
            }
        } else {
            // Still called so the skip is logged by the notifier itself.
            let _ = self.notifier.deliver(&subject, &html, &text).await;
            DeliveryStatus::Skipped
        };

        info!(
            fetched,
            rows_appended,
            defaulted,
            delivery = ?delivery,
            "Run complete"
        );

        Ok(RunReport {
            run_date,
            fetched,
            rows_appended,
            defaulted,
            text,
            html,
            delivery,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::error::{DeliveryError, SourceError};
    use crate::pipeline::enricher::EnricherConfig;
    use crate::pipeline::rules::KeywordInference;
    use crate::pipeline::types::RawMessage;

    struct FixedSource(Vec<RawMessage>);

    #[async_trait]
    impl MessageSource for FixedSource {
        fn name(&self) -> &str {
            "fixed"
        }
        async fn fetch_recent(
            &self,
            max_count: usize,
            _window: Duration,
        ) -> Result<Vec<RawMessage>, SourceError> {
            Ok(self.0.iter().take(max_count).cloned().collect())
        }
    }

    #[derive(Default)]
    struct Recording {
        sent: Mutex<Vec<(String, String, String)>>,
    }

    #[async_trait]
    impl Notifier for Recording {
        fn name(&self) -> &str {
            "recording"
        }
        async fn deliver(&self, subject: &str, html: &str, text: &str) -> Result<(), DeliveryError> {
            self.sent
                .lock()
                .unwrap()
                .push((subject.into(), html.into(), text.into()));
            Ok(())
        }
    }

    fn pipeline(
        messages: Vec<RawMessage>,
        notifier: Arc<dyn Notifier>,
        dir: &std::path::Path,
        max_count: usize,
    ) -> DigestPipeline {
        let config = PipelineConfig {
            max_count,
            history_path: dir.join("history.csv"),
            digest_path: None,
            ..PipelineConfig::default()
        };
        DigestPipeline::new(
            Arc::new(FixedSource(messages)),
            Enricher::new(Arc::new(KeywordInference::default_rules()), EnricherConfig::default()),
            HistoryStore::new(&config.history_path),
            notifier,
            config,
        )
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 5).unwrap()
    }

    #[tokio::test]
    async fn run_respects_max_count() {
        let tmp = tempfile::tempdir().unwrap();
        let messages = (0..5)
            .map(|i| RawMessage::new(i.to_string(), "a@b.c", format!("Meeting {i}")))
            .collect();
        let notifier = Arc::new(Recording::default());
        let report = pipeline(messages, notifier.clone(), tmp.path(), 3)
            .run(today())
            .await
            .unwrap();

        assert_eq!(report.fetched, 3);
        assert_eq!(report.rows_appended, 3);
        assert_eq!(report.exit_code(), 0);
        assert_eq!(notifier.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn subject_and_title_name_the_window() {
        let tmp = tempfile::tempdir().unwrap();
        let notifier = Arc::new(Recording::default());
        pipeline(Vec::new(), notifier.clone(), tmp.path(), 10)
            .run(today())
            .await
            .unwrap();

        let sent = notifier.sent.lock().unwrap();
        let (subject, html, text) = &sent[0];
        assert_eq!(subject, "Daily Email Digest (last 24h)");
        assert!(html.contains("📬 Daily Email Digest (last 24h)"));
        assert!(!text.trim().is_empty());
    }

    #[tokio::test]
    async fn digest_file_is_written_when_configured() {
        let tmp = tempfile::tempdir().unwrap();
        let digest_path = tmp.path().join("digest.txt");
        let mut p = pipeline(
            vec![RawMessage::new("1", "a@b.c", "Invoice due")],
            Arc::new(Recording::default()),
            tmp.path(),
            10,
        );
        p.config.digest_path = Some(digest_path.clone());

        let report = p.run(today()).await.unwrap();
        let written = std::fs::read_to_string(&digest_path).unwrap();
        assert_eq!(written, report.text);
        assert!(written.contains("Invoice due"));
    }
}
