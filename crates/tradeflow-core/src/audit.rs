//! Per-run audit log: a JSON artifact with every report and debate turn of a
//! finished run, plus a markdown rendering for terminals and PR comments.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::{AnalysisRecord, ReportSlot};

pub const AUDIT_SCHEMA_VERSION: &str = "1.0";

/// Canonical audit artifact written at the end of a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditArtifact {
    pub schema_version: String,
    pub generated_at: DateTime<Utc>,
    pub subject: String,
    pub as_of: String,
    pub market_report: Option<String>,
    pub sentiment_report: Option<String>,
    pub news_report: Option<String>,
    pub fundamentals_report: Option<String>,
    pub metaphysics_report: Option<String>,
    pub research_manager_report: Option<String>,
    pub bull_history: Vec<String>,
    pub bear_history: Vec<String>,
    pub trader_plan: Option<String>,
    pub conservative_history: Vec<String>,
    pub aggressive_history: Vec<String>,
    pub neutral_history: Vec<String>,
    pub judge_decision: Option<String>,
    pub final_risk_decision: Option<String>,
    pub final_trade_decision: Option<String>,
    pub degraded: bool,
    /// SHA-256 of the serialized record.
    pub record_digest: String,
}

impl AuditArtifact {
    pub fn from_record(record: &AnalysisRecord) -> Result<Self> {
        let report = |slot: ReportSlot| record.report(slot).map(|r| r.render());
        let debate = &record.investment_debate;
        let risk = &record.risk_debate;
        Ok(Self {
            schema_version: AUDIT_SCHEMA_VERSION.to_string(),
            generated_at: Utc::now(),
            subject: record.subject().to_string(),
            as_of: record.as_of().to_string(),
            market_report: report(ReportSlot::Market),
            sentiment_report: report(ReportSlot::Sentiment),
            news_report: report(ReportSlot::News),
            fundamentals_report: report(ReportSlot::Fundamentals),
            metaphysics_report: report(ReportSlot::Metaphysics),
            research_manager_report: record.research_plan.clone(),
            bull_history: debate.bull_history.clone(),
            bear_history: debate.bear_history.clone(),
            trader_plan: record.trader_plan.clone(),
            conservative_history: risk.conservative_history.clone(),
            aggressive_history: risk.aggressive_history.clone(),
            neutral_history: risk.neutral_history.clone(),
            judge_decision: debate.judge_decision.clone(),
            final_risk_decision: risk.final_risk_decision.clone(),
            final_trade_decision: record.final_decision.as_ref().map(|d| d.text()),
            degraded: record.is_degraded(),
            record_digest: record_digest(record)?,
        })
    }
}

/// Hex SHA-256 of the record's JSON form.
pub fn record_digest(record: &AnalysisRecord) -> Result<String> {
    let bytes = serde_json::to_vec(record).context("serialize record for digest")?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Writes audit artifacts under `<root>/<subject>/analysis_log_<as_of>.json`.
#[derive(Debug, Clone)]
pub struct AuditWriter {
    root: PathBuf,
}

impl AuditWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, record: &AnalysisRecord) -> PathBuf {
        self.root
            .join(sanitize(record.subject()))
            .join(format!("analysis_log_{}.json", record.as_of()))
    }

    /// Write the artifact atomically and return its path.
    pub fn write(&self, record: &AnalysisRecord) -> Result<PathBuf> {
        let artifact = AuditArtifact::from_record(record)?;
        let path = self.path_for(record);
        write_json_atomic(&path, &artifact)?;
        Ok(path)
    }
}

fn sanitize(subject: &str) -> String {
    subject
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect()
}

fn write_json_atomic(path: &Path, artifact: &AuditArtifact) -> Result<()> {
    let dir = path
        .parent()
        .with_context(|| format!("audit path {path:?} has no parent"))?;
    std::fs::create_dir_all(dir).with_context(|| format!("create {dir:?}"))?;
    let content = serde_json::to_string_pretty(artifact).context("serialize audit artifact")?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).context("create temp audit file")?;
    tmp.write_all(content.as_bytes())
        .context("write temp audit file")?;
    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("write {path:?}"))?;
    Ok(())
}

/// Render a markdown summary of a finished record.
pub fn render_summary_md(record: &AnalysisRecord) -> String {
    let mut out = format!("# {} ({})\n\n", record.subject(), record.as_of());

    out.push_str("## Analyst Reports\n");
    if record.reports.is_empty() {
        out.push_str("- none requested\n");
    }
    for (slot, report) in &record.reports {
        let flag = if report.is_degraded() { " (degraded)" } else { "" };
        out.push_str(&format!("### {slot}{flag}\n{}\n\n", report.render()));
    }

    let debate = &record.investment_debate;
    out.push_str(&format!(
        "\n## Research\n- bull arguments: {}\n- bear arguments: {}\n",
        debate.bull_history.len(),
        debate.bear_history.len()
    ));
    if let Some(plan) = &record.trader_plan {
        out.push_str(&format!("\n## Trader Plan\n{plan}\n"));
    }
    out.push_str(&format!(
        "\n## Risk Debate\n- rounds: {}\n- arguments: {}\n",
        record.risk_debate.round_count,
        record.risk_debate.combined_history.len()
    ));
    if let Some(decision) = &record.final_decision {
        out.push_str(&format!("\n## Final Decision\n{}\n", decision.text()));
    }
    out
}
