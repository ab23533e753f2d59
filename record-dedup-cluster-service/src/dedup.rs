use crate::similarity::record_similarity;
use rayon::prelude::*;
use record_dedup_service::dto::{DuplicateEntry, DuplicateGroup, Record, Similarity};
use record_dedup_service::error::ServiceError;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};

/// Below this size a worker pool costs more than it saves.
const PARALLEL_MIN_RECORDS: usize = 64;

/// Owners scored per parallel pass.
const CLAIM_CHUNK_SIZE: usize = 64;

///
/// Greedy sequential grouping, the reference every other path must match.
///
/// Each unclaimed record is compared against every later unclaimed record.
/// Records scoring at or above `threshold` are claimed by it. Only the
/// group's representative is compared, never its other duplicates, and
/// records that claim nothing are left out of the result.
///
/// ## Arguments
///
/// * `records` - The dataset, in ingestion order.
/// * `threshold` - Minimum record similarity (inclusive) to count as a duplicate.
///
pub fn find_duplicates(records: &[Record], threshold: f64) -> Vec<DuplicateGroup> {
    let mut processed = vec![false; records.len()];
    let mut groups = Vec::new();
    for i in 0..records.len() {
        if processed[i] {
            continue;
        }
        let mut duplicates = Vec::new();
        for j in (i + 1)..records.len() {
            if processed[j] {
                continue;
            }
            let score = record_similarity(&records[i], &records[j]);
            if score >= threshold {
                duplicates.push(duplicate_entry(records, j, score));
                processed[j] = true;
            }
        }
        if !duplicates.is_empty() {
            processed[i] = true;
            groups.push(make_group(groups.len() as u64 + 1, &records[i], duplicates));
        }
    }
    groups
}

///
/// Runs detection on a dedicated rayon pool.
///
/// ## Arguments
///
/// * `records` - The dataset, in ingestion order.
/// * `threshold` - Minimum record similarity (inclusive) to count as a duplicate.
/// * `workers` - Pool size, 0 lets rayon decide. Small datasets skip the pool.
/// * `cancel` - Checked between outer-scan steps; once set the call fails
/// with a `ConcurrencyAborted` error instead of returning partial groups.
///
pub fn detect(
    records: &[Record],
    threshold: f64,
    workers: usize,
    cancel: &AtomicBool,
) -> Result<Vec<DuplicateGroup>, ServiceError> {
    if cancel.load(Ordering::Relaxed) {
        return Err(cancelled());
    }
    if records.len() < PARALLEL_MIN_RECORDS {
        return Ok(find_duplicates(records, threshold));
    }
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(ServiceError::internal_server_error)?;
    pool.install(|| ClaimTable::new(records, threshold).into_groups(cancel))
}

///
/// Pairwise scores computed in parallel, resolved into groups sequentially.
///
/// Owners are taken in fixed-size chunks of ascending `i`. Each owner in a
/// chunk scores the later, still unclaimed records in parallel; the chunk is
/// then applied in ascending `i` order before the next one is scored, so the
/// smallest forming owner wins exactly as in `find_duplicates`, whatever the
/// number of workers. Pending scores never exceed one chunk's worth.
///
pub struct ClaimTable<'a> {
    records: &'a [Record],
    threshold: f64,
    chunk_size: usize,
    processed: Vec<bool>,
    groups: Vec<DuplicateGroup>,
}

impl<'a> ClaimTable<'a> {
    pub fn new(records: &'a [Record], threshold: f64) -> Self {
        ClaimTable {
            records,
            threshold,
            chunk_size: CLAIM_CHUNK_SIZE,
            processed: vec![false; records.len()],
            groups: Vec::new(),
        }
    }

    #[cfg(test)]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn into_groups(mut self, cancel: &AtomicBool) -> Result<Vec<DuplicateGroup>, ServiceError> {
        let len = self.records.len();
        let mut chunk_start = 0;
        while chunk_start < len {
            let owners = chunk_start..(chunk_start + self.chunk_size).min(len);
            let scored = self.score_owners(owners.clone(), cancel).ok_or_else(cancelled)?;
            for (i, claims) in owners.zip(scored) {
                if cancel.load(Ordering::Relaxed) {
                    return Err(cancelled());
                }
                self.claim(i, claims);
            }
            chunk_start += self.chunk_size;
        }
        Ok(self.groups)
    }

    /// Scores each owner against the later records unclaimed so far. `None`
    /// once `cancel` is set.
    fn score_owners(
        &self,
        owners: Range<usize>,
        cancel: &AtomicBool,
    ) -> Option<Vec<Vec<(usize, f64)>>> {
        let records = self.records;
        let threshold = self.threshold;
        let processed = &self.processed;
        owners
            .into_par_iter()
            .map(|i| {
                if cancel.load(Ordering::Relaxed) {
                    return None;
                }
                if processed[i] {
                    return Some(Vec::new());
                }
                let claims = ((i + 1)..records.len())
                    .filter(|&j| !processed[j])
                    .filter_map(|j| {
                        let score = record_similarity(&records[i], &records[j]);
                        (score >= threshold).then_some((j, score))
                    })
                    .collect();
                Some(claims)
            })
            .collect()
    }

    fn claim(&mut self, i: usize, claims: Vec<(usize, f64)>) {
        if self.processed[i] {
            return;
        }
        let mut duplicates = Vec::new();
        for (j, score) in claims {
            if !self.processed[j] {
                self.processed[j] = true;
                duplicates.push(duplicate_entry(self.records, j, score));
            }
        }
        if !duplicates.is_empty() {
            self.processed[i] = true;
            let group_id = self.groups.len() as u64 + 1;
            self.groups.push(make_group(group_id, &self.records[i], duplicates));
        }
    }
}

fn cancelled() -> ServiceError {
    ServiceError::aborted("Duplicate detection was cancelled before completion")
}

fn duplicate_entry(records: &[Record], index: usize, score: f64) -> DuplicateEntry {
    DuplicateEntry {
        record: records[index].clone(),
        similarity: Similarity::new(score),
        source_index: index,
    }
}

fn make_group(group_id: u64, original: &Record, mut duplicates: Vec<DuplicateEntry>) -> DuplicateGroup {
    // stable, ties keep scan order
    duplicates.sort_by(|a, b| b.similarity.value().total_cmp(&a.similarity.value()));
    DuplicateGroup {
        group_id,
        original: original.clone(),
        duplicates,
    }
}
