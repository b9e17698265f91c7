//! Export of generated outreach for review outside the tool.
use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::model::{Lead, OutreachRecord};

/// One exported line: the lead plus its generated message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportRow {
    pub lead_id: i64,
    pub business_name: String,
    pub website_url: String,
    pub email: String,
    pub phone: String,
    pub industry: String,
    pub location: String,
    pub composite_score: u8,
    pub priority: String,
    pub qualification_score: u8,
    pub subject_line: String,
    pub email_body: String,
    pub rationale: String,
    pub source: String,
}

impl ExportRow {
    pub fn new(lead: &Lead, outreach: &OutreachRecord) -> Self {
        let text = |v: &Option<String>| v.clone().unwrap_or_default();
        Self {
            lead_id: lead.id,
            business_name: lead.business_name.clone(),
            website_url: lead.website_url.clone(),
            email: text(&lead.email),
            phone: text(&lead.phone),
            industry: text(&lead.industry),
            location: text(&lead.location),
            composite_score: outreach.composite_score,
            priority: outreach.priority.as_str().to_string(),
            qualification_score: outreach.qualification_score,
            subject_line: outreach.subject.clone(),
            email_body: outreach.body.clone(),
            rationale: outreach.rationale.clone(),
            source: outreach.source.as_str().to_string(),
        }
    }
}

pub trait Exporter: Send + Sync {
    /// Write `rows` somewhere. Returns the location written, or `None` when
    /// there was nothing to write.
    fn export(&self, rows: &[ExportRow]) -> Result<Option<PathBuf>>;
}

/// Writes `outreach_export_<timestamp>.csv` into a directory.
#[derive(Debug, Clone)]
pub struct CsvExporter {
    dir: PathBuf,
}

impl CsvExporter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Exporter for CsvExporter {
    fn export(&self, rows: &[ExportRow]) -> Result<Option<PathBuf>> {
        if rows.is_empty() {
            return Ok(None);
        }
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create {}", self.dir.display()))?;
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let path = self.dir.join(format!("outreach_export_{stamp}.csv"));

        let mut writer = csv::Writer::from_path(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        info!(rows = rows.len(), path = %path.display(), "exported outreach");
        Ok(Some(path))
    }
}
