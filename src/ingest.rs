//! CSV lead import.
use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{info, instrument, warn};
use url::Url;

use crate::db::{self, InsertOutcome};
use crate::model::NewLead;

pub const DEFAULT_SOURCE: &str = "csv_import";
const REQUIRED: [&str; 2] = ["business_name", "website_url"];
const SAMPLE_HEADER: [&str; 6] = [
    "business_name",
    "website_url",
    "email",
    "phone",
    "industry",
    "location",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub total_rows: usize,
    pub imported: usize,
    pub duplicates: usize,
    pub errors: usize,
}

/// Add a scheme when missing and check the result is a usable web URL.
/// A trailing slash is dropped so `x.com` and `x.com/` dedupe together.
pub fn normalize_url(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let lower = raw.to_ascii_lowercase();
    let with_scheme = if lower.starts_with("http://") || lower.starts_with("https://") {
        raw.to_string()
    } else {
        format!("https://{raw}")
    };
    let parsed = Url::parse(&with_scheme).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return None;
    }
    Some(with_scheme.trim_end_matches('/').to_string())
}

fn column_index(headers: &csv::StringRecord) -> HashMap<String, usize> {
    headers
        .iter()
        .enumerate()
        .map(|(i, h)| (h.trim_start_matches('\u{feff}').trim().to_lowercase(), i))
        .collect()
}

/// Import leads from CSV text. Rows missing a required field or with an
/// unusable URL count as errors; known URLs count as duplicates.
#[instrument(skip_all, fields(source = source))]
pub async fn import_csv<R: Read>(pool: &db::Pool, input: R, source: &str) -> Result<ImportSummary> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(input);
    let columns = column_index(reader.headers().context("CSV has no header row")?);
    let missing: Vec<&str> = REQUIRED
        .iter()
        .copied()
        .filter(|c| !columns.contains_key(*c))
        .collect();
    if !missing.is_empty() {
        bail!("CSV is missing required columns: {}", missing.join(", "));
    }

    let mut summary = ImportSummary::default();
    for (idx, record) in reader.records().enumerate() {
        let row_num = idx + 2;
        summary.total_rows += 1;
        let record = match record {
            Ok(r) => r,
            Err(err) => {
                warn!(row = row_num, %err, "unreadable row");
                summary.errors += 1;
                continue;
            }
        };
        let field = |name: &str| {
            columns
                .get(name)
                .and_then(|i| record.get(*i))
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let Some(business_name) = field("business_name") else {
            warn!(row = row_num, "missing business_name; skipped");
            summary.errors += 1;
            continue;
        };
        let Some(raw_url) = field("website_url") else {
            warn!(row = row_num, "missing website_url; skipped");
            summary.errors += 1;
            continue;
        };
        let Some(website_url) = normalize_url(&raw_url) else {
            warn!(row = row_num, url = %raw_url, "invalid website_url; skipped");
            summary.errors += 1;
            continue;
        };

        let lead = NewLead {
            business_name,
            website_url,
            email: field("email"),
            phone: field("phone"),
            industry: field("industry"),
            location: field("location"),
            source: Some(source.to_string()),
        };
        match db::insert_lead(pool, &lead).await {
            Ok(InsertOutcome::Created(id)) => {
                info!(row = row_num, lead_id = id, name = %lead.business_name, "imported");
                summary.imported += 1;
            }
            Ok(InsertOutcome::Duplicate) => {
                info!(row = row_num, url = %lead.website_url, "duplicate; skipped");
                summary.duplicates += 1;
            }
            Err(err) => {
                warn!(row = row_num, ?err, "failed to save lead");
                summary.errors += 1;
            }
        }
    }

    info!(
        total = summary.total_rows,
        imported = summary.imported,
        duplicates = summary.duplicates,
        errors = summary.errors,
        "import complete"
    );
    Ok(summary)
}

pub async fn import_file(pool: &db::Pool, path: &Path, source: &str) -> Result<ImportSummary> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    import_csv(pool, file, source).await
}

/// Write a sample CSV showing the expected columns.
pub fn write_template(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    writer.write_record(SAMPLE_HEADER)?;
    writer.write_record([
        "Mama Rosa Pizzeria",
        "https://www.mamarosapizza.com",
        "info@mamarosapizza.com",
        "555-123-4567",
        "restaurant",
        "Brooklyn, NY",
    ])?;
    writer.write_record([
        "Bright Smile Dental",
        "https://www.brightsmile.com",
        "hello@brightsmile.com",
        "555-234-5678",
        "dental",
        "Austin, TX",
    ])?;
    writer.write_record([
        "Summit Realty Group",
        "https://www.summitrealty.com",
        "",
        "555-345-6789",
        "real estate",
        "Denver, CO",
    ])?;
    writer.flush()?;
    Ok(())
}
