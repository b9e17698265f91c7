//! Wire types for the PageSpeed Insights v5 `runPagespeed` response.
//!
//! Only the parts of `lighthouseResult` that feed the audit are modelled.
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Deserialize, Debug, Default)]
pub struct RunPagespeedResp {
    #[serde(rename = "lighthouseResult", default)]
    pub lighthouse_result: Option<LighthouseResult>,
}

#[derive(Deserialize, Debug, Default)]
pub struct LighthouseResult {
    #[serde(default)]
    pub categories: HashMap<String, LighthouseCategory>,
    #[serde(default)]
    pub audits: HashMap<String, LighthouseAudit>,
}

#[derive(Deserialize, Debug, Default)]
pub struct LighthouseCategory {
    #[serde(default)]
    pub score: Option<f64>,
}

#[derive(Deserialize, Debug, Default)]
pub struct LighthouseAudit {
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(rename = "displayValue", default)]
    pub display_value: Option<String>,
}
