//! Run configuration.
//!
//! Settings come from serde defaults, then an optional TOML file, then
//! `RFM_*` environment variables. The binary applies CLI overrides last.

use std::collections::HashSet;
use std::path::Path;

use chrono::NaiveDate;
use config::{Config, Environment, File, FileFormat};
use serde::{de, Deserialize, Deserializer, Serialize};

use crate::error::RfmError;
use crate::rfm::ZeroFrequencyPolicy;
use crate::segment::Segment;

/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "RFM";
/// Environment variable for the log filter.
pub const LOG_ENV_VAR: &str = "RFM_LOG";

/// Segmentation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Reference date recency is measured from. Pinned rather than derived
    /// from the data so reruns on a refreshed extract stay comparable.
    #[serde(default = "default_analysis_date")]
    pub analysis_date: NaiveDate,

    #[serde(default)]
    pub zero_frequency: ZeroFrequencyPolicy,

    /// Separator between tokens of `interested_in_categories_12`
    #[serde(default = "default_category_delimiter")]
    pub category_delimiter: String,

    /// Target lists to export
    #[serde(default = "default_campaigns")]
    pub campaigns: Vec<CampaignConfig>,
}

/// One exported target list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignConfig {
    pub name: String,
    /// Segments whose customers are targeted, by exact snake_case name
    #[serde(deserialize_with = "deserialize_segments")]
    pub segments: Vec<Segment>,
    /// Only keep customers interested in this category token
    #[serde(default)]
    pub category: Option<String>,
    /// Output file name, relative to the output directory
    pub file_name: String,
}

// Parsed from strings: the `config` crate folds enum variants to lowercase,
// which would accept mis-cased names.
fn deserialize_segments<'de, D>(deserializer: D) -> Result<Vec<Segment>, D::Error>
where
    D: Deserializer<'de>,
{
    Vec::<String>::deserialize(deserializer)?
        .iter()
        .map(|name| name.parse().map_err(de::Error::custom))
        .collect()
}

fn default_analysis_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2021, 6, 1).unwrap_or_default()
}

fn default_category_delimiter() -> String {
    ",".to_string()
}

fn default_campaigns() -> Vec<CampaignConfig> {
    vec![
        CampaignConfig {
            name: "new_brand_target".to_string(),
            segments: vec![Segment::LoyalCustomers, Segment::Champions],
            category: Some("KADIN".to_string()),
            file_name: "new_brand_target_customer_ids.csv".to_string(),
        },
        CampaignConfig {
            name: "discount_target".to_string(),
            segments: vec![Segment::AboutToSleep, Segment::NewCustomers],
            category: None,
            file_name: "discount_target_customer_ids.csv".to_string(),
        },
    ]
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            analysis_date: default_analysis_date(),
            zero_frequency: ZeroFrequencyPolicy::default(),
            category_delimiter: default_category_delimiter(),
            campaigns: default_campaigns(),
        }
    }
}

impl Settings {
    /// Replace the category filter of every campaign that filters by category.
    pub fn with_category(mut self, category: &str) -> Self {
        for campaign in &mut self.campaigns {
            if campaign.category.is_some() {
                campaign.category = Some(category.to_string());
            }
        }
        self
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.category_delimiter.is_empty() {
            return Err(RfmError::InvalidConfig("category_delimiter must not be empty".to_string()));
        }

        let mut file_names = HashSet::new();
        for campaign in &self.campaigns {
            if campaign.segments.is_empty() {
                return Err(RfmError::InvalidConfig(format!(
                    "campaign '{}' targets no segments",
                    campaign.name
                )));
            }
            if campaign.file_name.trim().is_empty() {
                return Err(RfmError::InvalidConfig(format!(
                    "campaign '{}' has no output file name",
                    campaign.name
                )));
            }
            if campaign.category.as_deref().is_some_and(|c| c.trim().is_empty()) {
                return Err(RfmError::InvalidConfig(format!(
                    "campaign '{}' has a blank category filter",
                    campaign.name
                )));
            }
            if !file_names.insert(campaign.file_name.as_str()) {
                return Err(RfmError::InvalidConfig(format!(
                    "output file '{}' is used by more than one campaign",
                    campaign.file_name
                )));
            }
        }
        Ok(())
    }
}

/// Load settings from an optional TOML file and the environment.
pub fn load_settings(path: Option<&Path>) -> crate::Result<Settings> {
    let mut builder = Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
    }
    builder = builder.add_source(
        Environment::with_prefix(CONFIG_ENV_PREFIX)
            .prefix_separator("_")
            .separator("__"),
    );

    let settings: Settings = builder.build()?.try_deserialize()?;
    settings.validate()?;
    Ok(settings)
}
