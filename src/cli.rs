//! Command-line interface definitions and argument parsing

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::Parser;

use crate::config::Settings;

/// Customer segmentation CLI using quintile-based RFM scoring
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the customer extract CSV file
    #[arg(short, long, default_value = "flo_data_20k.csv")]
    pub input: PathBuf,

    /// Optional TOML settings file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Reference date recency is measured from (YYYY-MM-DD)
    #[arg(short, long, value_parser = parse_date)]
    pub analysis_date: Option<NaiveDate>,

    /// Category token required by campaigns that filter by category
    #[arg(long)]
    pub category: Option<String>,

    /// Directory the campaign target lists are written to
    #[arg(short, long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Also export every customer's scores and segment to this CSV file
    #[arg(long)]
    pub scores_output: Option<PathBuf>,

    /// Render a segment size bar chart to this SVG file
    #[arg(long)]
    pub chart: Option<PathBuf>,

    /// Print channel totals and top customers
    #[arg(short, long)]
    pub report: bool,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Apply command-line overrides on top of loaded settings
    pub fn apply_overrides(&self, mut settings: Settings) -> Settings {
        if let Some(date) = self.analysis_date {
            settings.analysis_date = date;
        }
        if let Some(ref category) = self.category {
            settings = settings.with_category(category);
        }
        settings
    }
}

fn parse_date(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| format!("Invalid date '{}': expected YYYY-MM-DD", value))
}
