//! Card partitions and their assembly.

use std::collections::BTreeSet;
use std::path::PathBuf;

use dc_core::{CardWriter, Entity, Model, Predicate, Result, Workspace};

use crate::categories::CategoryRegistry;

/// Selects the bins of one card partition by channel and bin id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartitionFilter {
    channels: Option<BTreeSet<String>>,
    bin_ids: Option<BTreeSet<u32>>,
}

impl PartitionFilter {
    /// Everything.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn channels<I: IntoIterator<Item = S>, S: Into<String>>(mut self, channels: I) -> Self {
        self.channels = Some(channels.into_iter().map(Into::into).collect());
        self
    }

    pub fn bin_ids(mut self, ids: impl IntoIterator<Item = u32>) -> Self {
        self.bin_ids = Some(ids.into_iter().collect());
        self
    }
}

impl Predicate for PartitionFilter {
    fn matches(&self, entity: &Entity<'_>) -> bool {
        let bin = entity.bin();
        self.channels.as_ref().is_none_or(|c| c.contains(&bin.channel))
            && self.bin_ids.as_ref().is_none_or(|ids| ids.contains(&bin.bin_id))
    }
}

/// A tagged subset of the model written as its own set of cards.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    pub tag: String,
    pub filter: PartitionFilter,
}

impl Partition {
    pub fn new(tag: impl Into<String>, filter: PartitionFilter) -> Self {
        Self { tag: tag.into(), filter }
    }
}

/// Standard partitions: the full combination, one per channel, one per
/// (channel, base category) and one per base category across channels.
///
/// Category partitions include the control-region ids of their base category.
pub fn standard_partitions(
    registry: &CategoryRegistry,
    channels: &[String],
    analysis: &str,
    era: &str,
) -> Vec<Partition> {
    let mut parts = vec![Partition::new("cmb", PartitionFilter::all())];
    for chn in channels {
        parts.push(Partition::new(chn.clone(), PartitionFilter::all().channels([chn.as_str()])));
    }
    let base_ids = registry.base_ids();
    for chn in channels {
        for &id in &base_ids {
            parts.push(Partition::new(
                format!("{}_{}_{}_{}", analysis, chn, id, era),
                PartitionFilter::all().channels([chn.as_str()]).bin_ids(registry.group_ids(id)),
            ));
        }
    }
    for &id in &base_ids {
        parts.push(Partition::new(
            format!("{}_cmb_{}_{}", analysis, id, era),
            PartitionFilter::all().bin_ids(registry.group_ids(id)),
        ));
    }
    parts
}

/// What assembly wrote.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssemblyReport {
    /// Files per partition tag, in partition order.
    pub written: Vec<(String, Vec<PathBuf>)>,
    /// Partitions with nothing to write.
    pub skipped: Vec<String>,
}

impl AssemblyReport {
    pub fn n_files(&self) -> usize {
        self.written.iter().map(|(_, f)| f.len()).sum()
    }
}

/// Write each partition through `writer`; empty partitions are skipped.
pub fn assemble<W: CardWriter + ?Sized>(
    writer: &mut W,
    model: &Model,
    workspace: &Workspace,
    partitions: &[Partition],
) -> Result<AssemblyReport> {
    let mut report = AssemblyReport::default();
    for part in partitions {
        let sub = model.filtered(&part.filter);
        if sub.is_empty() {
            log::info!("partition '{}' is empty, nothing written", part.tag);
            report.skipped.push(part.tag.clone());
            continue;
        }
        let files = writer.write(&part.tag, &sub, workspace)?;
        log::info!("partition '{}': {} files", part.tag, files.len());
        report.written.push((part.tag.clone(), files));
    }
    Ok(report)
}
