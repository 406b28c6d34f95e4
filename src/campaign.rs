//! Campaign target lists and CSV export

use std::collections::HashMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use polars::prelude::*;
use tracing::{info, warn};

use crate::config::CampaignConfig;
use crate::data::CustomerRecord;
use crate::pipeline::SegmentationRun;
use crate::score::{Quintile, ScoredRecord};

/// Header of exported id lists
pub const CUSTOMER_ID_HEADER: &str = "customer_id";

/// Ordered customer ids selected for one campaign
#[derive(Debug, Clone, PartialEq)]
pub struct TargetList {
    pub name: String,
    pub file_name: String,
    pub customer_ids: Vec<String>,
}

/// Contents of an output file
#[derive(Debug)]
pub enum FileContents {
    Csv(DataFrame),
    Text(String),
}

/// A file waiting to be written; see [`commit`].
#[derive(Debug)]
pub struct PendingFile {
    pub path: PathBuf,
    pub contents: FileContents,
}

/// Select the customers a campaign targets.
///
/// Keeps run order. When the campaign has a category filter, a customer
/// qualifies if any of their input rows lists that category token.
pub fn select_targets(
    run: &SegmentationRun,
    records: &[CustomerRecord],
    campaign: &CampaignConfig,
) -> TargetList {
    let mut rows_by_id: HashMap<&str, Vec<&CustomerRecord>> = HashMap::new();
    if campaign.category.is_some() {
        for record in records {
            rows_by_id.entry(record.customer_id.as_str()).or_default().push(record);
        }
    }

    let customer_ids: Vec<String> = run
        .customers
        .iter()
        .filter(|customer| campaign.segments.contains(&customer.segment))
        .filter(|customer| match campaign.category.as_deref() {
            Some(category) => rows_by_id
                .get(customer.customer_id())
                .is_some_and(|rows| rows.iter().any(|row| row.is_interested_in(category))),
            None => true,
        })
        .map(|customer| customer.customer_id().to_string())
        .collect();

    info!(campaign = %campaign.name, targets = customer_ids.len(), "selected campaign targets");
    TargetList {
        name: campaign.name.clone(),
        file_name: campaign.file_name.clone(),
        customer_ids,
    }
}

/// Target lists for every configured campaign, in configuration order.
pub fn build_target_lists(
    run: &SegmentationRun,
    records: &[CustomerRecord],
    campaigns: &[CampaignConfig],
) -> Vec<TargetList> {
    campaigns
        .iter()
        .map(|campaign| select_targets(run, records, campaign))
        .collect()
}

/// One-column id frame for a target list.
pub fn target_frame(list: &TargetList) -> crate::Result<DataFrame> {
    Ok(DataFrame::new(vec![Series::new(CUSTOMER_ID_HEADER, &list.customer_ids)])?)
}

/// Full per-customer score table.
pub fn scores_frame(run: &SegmentationRun) -> crate::Result<DataFrame> {
    let customers = &run.customers;
    let ids: Vec<&str> = customers.iter().map(|c| c.customer_id()).collect();
    let recency: Vec<u32> = customers.iter().map(|c| c.scored.rfm.recency).collect();
    let frequency: Vec<u32> = customers.iter().map(|c| c.scored.rfm.frequency).collect();
    let monetary: Vec<f64> = customers.iter().map(|c| c.scored.rfm.monetary).collect();
    let score = |pick: fn(&ScoredRecord) -> Quintile| -> Vec<u32> {
        customers.iter().map(|c| u32::from(pick(&c.scored).get())).collect()
    };
    let recency_score = score(|s| s.recency_score);
    let frequency_score = score(|s| s.frequency_score);
    let monetary_score = score(|s| s.monetary_score);
    let rf_code: Vec<String> = customers.iter().map(|c| c.scored.rf_code.to_string()).collect();
    let rfm_code: Vec<String> = customers.iter().map(|c| c.scored.rfm_code.to_string()).collect();
    let segment: Vec<&str> = customers.iter().map(|c| c.segment.as_str()).collect();

    Ok(DataFrame::new(vec![
        Series::new(CUSTOMER_ID_HEADER, ids),
        Series::new("recency", recency),
        Series::new("frequency", frequency),
        Series::new("monetary", monetary),
        Series::new("recency_score", recency_score),
        Series::new("frequency_score", frequency_score),
        Series::new("monetary_score", monetary_score),
        Series::new("rf_code", rf_code),
        Series::new("rfm_code", rfm_code),
        Series::new("segment", segment),
    ])?)
}

/// Pending files for every target list, placed in `output_dir`.
pub fn pending_target_files(
    output_dir: &Path,
    lists: &[TargetList],
) -> crate::Result<Vec<PendingFile>> {
    lists
        .iter()
        .map(|list| {
            Ok(PendingFile {
                path: output_dir.join(&list.file_name),
                contents: FileContents::Csv(target_frame(list)?),
            })
        })
        .collect()
}

/// Write all pending files, or none of them.
///
/// Every file is first written next to its target as `<name>.tmp`; the
/// temporaries are renamed into place only once all writes succeeded.
pub fn commit(files: Vec<PendingFile>) -> crate::Result<Vec<PathBuf>> {
    let mut staged: Vec<(PathBuf, PathBuf)> = Vec::with_capacity(files.len());

    for mut file in files {
        let tmp = staging_path(&file.path);
        if let Err(err) = write_file(&tmp, &mut file.contents) {
            discard(staged.iter().map(|(tmp, _)| tmp.as_path()).chain([tmp.as_path()]));
            return Err(err);
        }
        staged.push((tmp, file.path));
    }

    let mut committed: Vec<PathBuf> = Vec::with_capacity(staged.len());
    for (index, (tmp, path)) in staged.iter().enumerate() {
        if let Err(err) = fs::rename(tmp, path) {
            discard(committed.iter().map(PathBuf::as_path));
            discard(staged[index..].iter().map(|(tmp, _)| tmp.as_path()));
            return Err(err.into());
        }
        committed.push(path.clone());
    }

    for path in &committed {
        info!(path = %path.display(), "wrote output file");
    }
    Ok(committed)
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn write_file(path: &Path, contents: &mut FileContents) -> crate::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    match contents {
        FileContents::Csv(frame) => {
            let mut file = File::create(path)?;
            CsvWriter::new(&mut file).include_header(true).finish(frame)?;
        }
        FileContents::Text(text) => fs::write(path, text.as_bytes())?,
    }
    Ok(())
}

fn discard<'a>(paths: impl Iterator<Item = &'a Path>) {
    for path in paths {
        if let Err(err) = fs::remove_file(path) {
            warn!(path = %path.display(), %err, "could not remove partial output");
        }
    }
}
