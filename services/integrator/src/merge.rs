//! Priority merge resolver.
//!
//! One invocation moves through `Collecting -> Ranking -> Committing -> Done`
//! inside a single [`MergeSession`]: the session holds the destination's write
//! lock from before staging is read until the commit, so concurrent merges
//! run one after the other and each ranks the staging contents it finds once
//! it holds the lock. A failure at any phase drops the session and leaves the
//! destination at its pre-merge state. Keys absent from every source are
//! never deleted.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{FlatRecord, MergedRecord, RecordKey, Source, SourcePriority};
use thiserror::Error;

use crate::store::StoreError;

/// Storage seam for the merge.
#[async_trait]
pub trait FactStore: Send + Sync {
    /// Every staged record, tagged with its source, read without taking the
    /// destination lock. A missing source contributes nothing.
    async fn collect(&self) -> Result<Vec<FlatRecord>, StoreError>;

    /// Take the destination's write lock and open a session on it. Waits
    /// while another session holds the lock.
    async fn begin<'a>(&'a self) -> Result<Box<dyn MergeSession + 'a>, StoreError>;
}

/// A merge in progress. Dropping it without `commit` discards it.
#[async_trait]
pub trait MergeSession: Send {
    /// Staged records as seen under the lock.
    async fn collect(&mut self) -> Result<Vec<FlatRecord>, StoreError>;

    /// Upsert `rows` on (country, year, indicator), overwriting
    /// unconditionally, and release the lock.
    async fn commit(&mut self, rows: &[MergedRecord]) -> Result<u64, StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePhase {
    Collecting,
    Ranking,
    Committing,
    Done,
}

impl Display for MergePhase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Collecting => "COLLECTING",
            Self::Ranking => "RANKING",
            Self::Committing => "COMMITTING",
            Self::Done => "DONE",
        })
    }
}

#[derive(Debug, Error)]
#[error("merge failed during {phase}")]
pub struct MergeError {
    pub phase: MergePhase,
    #[source]
    pub source: StoreError,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub collected: usize,
    pub merged: usize,
    pub written: u64,
    /// Winning rows per source.
    pub winners: BTreeMap<Source, usize>,
}

/// Pick one record per key: the lowest priority rank wins, ties keep the
/// record seen first. Years before `year_min` are excluded. Output is in key
/// order.
pub fn rank(
    records: Vec<FlatRecord>,
    priority: &SourcePriority,
    year_min: i32,
    load_ts: DateTime<Utc>,
) -> Vec<MergedRecord> {
    let mut best: BTreeMap<RecordKey, FlatRecord> = BTreeMap::new();
    for record in records.into_iter().filter(|r| r.year >= year_min) {
        match best.entry(record.key()) {
            Entry::Vacant(slot) => {
                slot.insert(record);
            }
            Entry::Occupied(mut slot) => {
                if priority.rank(record.source) < priority.rank(slot.get().source) {
                    slot.insert(record);
                }
            }
        }
    }

    best.into_values()
        .map(|r| MergedRecord {
            country: r.country,
            year: r.year,
            indicator: r.indicator,
            value: r.value,
            source: r.source,
            load_ts,
        })
        .collect()
}

pub struct MergeResolver<'a> {
    store: &'a dyn FactStore,
    priority: SourcePriority,
    year_min: i32,
}

impl<'a> MergeResolver<'a> {
    pub fn new(store: &'a dyn FactStore, priority: SourcePriority, year_min: i32) -> Self {
        Self {
            store,
            priority,
            year_min,
        }
    }

    /// Collect and rank without writing.
    pub async fn preview(&self) -> Result<(Vec<MergedRecord>, MergeReport), MergeError> {
        let phase = MergePhase::Collecting;
        tracing::info!(%phase, priority = %self.priority, "merge preview started");
        let staged = self
            .store
            .collect()
            .await
            .map_err(|source| MergeError { phase, source })?;
        Ok(self.rank_staged(staged))
    }

    pub async fn run(&self) -> Result<MergeReport, MergeError> {
        let phase = MergePhase::Collecting;
        tracing::info!(%phase, priority = %self.priority, "merge started");
        let mut session = self
            .store
            .begin()
            .await
            .map_err(|source| MergeError { phase, source })?;
        let staged = session
            .collect()
            .await
            .map_err(|source| MergeError { phase, source })?;

        let (merged, mut report) = self.rank_staged(staged);
        if merged.is_empty() {
            tracing::warn!("nothing staged, destination left untouched");
            return Ok(report);
        }

        let phase = MergePhase::Committing;
        report.written = session
            .commit(&merged)
            .await
            .map_err(|source| MergeError { phase, source })?;

        tracing::info!(
            phase = %MergePhase::Done,
            written = report.written,
            winners = ?report.winners,
            "merge committed"
        );
        Ok(report)
    }

    fn rank_staged(&self, staged: Vec<FlatRecord>) -> (Vec<MergedRecord>, MergeReport) {
        let mut report = MergeReport {
            collected: staged.len(),
            ..Default::default()
        };
        for source in self.priority.sources() {
            let rows = staged.iter().filter(|r| r.source == *source).count();
            if rows == 0 {
                tracing::warn!(%source, "no staged rows for source");
            } else {
                tracing::info!(%source, rows, "source collected");
            }
        }

        let merged = rank(staged, &self.priority, self.year_min, Utc::now());
        report.merged = merged.len();
        for row in &merged {
            *report.winners.entry(row.source).or_default() += 1;
        }
        tracing::info!(
            phase = %MergePhase::Ranking,
            rows = report.merged,
            year_min = self.year_min,
            "ranked"
        );
        (merged, report)
    }
}
