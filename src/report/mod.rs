use anyhow::{bail, Context, Result};
use reqwest::StatusCode;
use serde::Serialize;
use tracing::{debug, info};

use crate::aggregate::TrafficTotals;
use crate::config::CollectorConfig;

/// One wire unit of the traffic report.
#[derive(Debug, Serialize)]
pub struct TrafficReportEntry<'a> {
    #[serde(rename = "embyUserId")]
    pub emby_user_id: &'a str,

    pub bytes: u64,

    #[serde(rename = "type")]
    pub kind: &'static str,
}

#[derive(Debug, Serialize)]
struct ReportBody<'a> {
    reports: Vec<TrafficReportEntry<'a>>,
}

/// Build the report entries for an aggregate. Entry order carries no meaning.
pub fn build_entries(totals: &TrafficTotals) -> Vec<TrafficReportEntry<'_>> {
    totals
        .iter()
        .map(|(user_id, bytes)| TrafficReportEntry {
            emby_user_id: user_id,
            bytes: *bytes,
            kind: "download",
        })
        .collect()
}

/// Delivers aggregated traffic to the collector.
///
/// Seams the HTTP call away from the sync runner so delivery failure paths
/// can be exercised in tests.
pub trait ReportSink: Send + Sync {
    /// Deliver the aggregate. An empty aggregate is trivially successful.
    /// Any error aborts the run upstream; the checkpoint stays untouched and
    /// the next run re-aggregates the same rows.
    fn report(&self, totals: &TrafficTotals) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// HTTP reporter posting to the collector's traffic endpoint.
pub struct HttpReporter {
    http: reqwest::Client,
    url: String,
    token: String,
}

impl HttpReporter {
    /// Create a reporter with a bounded request timeout.
    pub fn new(cfg: &CollectorConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(cfg.timeout)
            .build()
            .context("building HTTP client")?;

        Ok(Self {
            http,
            url: report_url(&cfg.base_url),
            token: cfg.token.clone(),
        })
    }
}

impl ReportSink for HttpReporter {
    async fn report(&self, totals: &TrafficTotals) -> Result<()> {
        if totals.is_empty() {
            info!("no traffic to report");
            return Ok(());
        }

        let entries = build_entries(totals);
        let users = entries.len();
        let bytes: u64 = totals.values().sum();

        for (user_id, user_bytes) in totals {
            debug!(
                user_id = %user_id,
                mib = *user_bytes as f64 / 1024.0 / 1024.0,
                "user traffic",
            );
        }

        let response = self
            .http
            .post(&self.url)
            .bearer_auth(&self.token)
            .json(&ReportBody { reports: entries })
            .send()
            .await
            .context("sending traffic report")?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            bail!("collector rejected traffic report: {status} {body}");
        }

        info!(users, bytes, "reported traffic");

        Ok(())
    }
}

/// Collector report endpoint for a base URL, tolerating a trailing slash.
fn report_url(base_url: &str) -> String {
    format!(
        "{}/api/traffic/report",
        base_url.trim_end_matches('/')
    )
}
