//! Per-group chunk deduplication.
//!
//! A group's seen-set only ever grows while its snapshots are observed
//! oldest first, and is dropped with the accumulator. Seen-sets are never
//! shared between groups, so chunks common to two guests are counted once
//! for each of them.

use crate::snapshot::SnapshotTime;
use crate::{BackupGroup, ChunkID, Error, Result};
use rustc_hash::FxHashSet;
use serde::Serialize;
use std::ops::AddAssign;

/// Chunk counts for one observed snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Observation {
    /// Distinct chunks not referenced by any earlier snapshot of the group.
    pub new_chunks: u64,
    /// Distinct chunks referenced by the snapshot.
    pub referenced_chunks: u64,
}

/// Running totals over every snapshot observed for a group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GroupTally {
    pub snapshots: u64,
    pub new_chunks: u64,
    pub referenced_chunks: u64,
}

impl AddAssign<Observation> for GroupTally {
    fn add_assign(&mut self, obs: Observation) {
        self.snapshots += 1;
        self.new_chunks += obs.new_chunks;
        self.referenced_chunks += obs.referenced_chunks;
    }
}

/// Set of chunk digests already credited to a group.
#[derive(Debug, Default)]
pub struct SeenSet {
    chunks: FxHashSet<ChunkID>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts the distinct and the not-yet-seen chunks in `chunks`, then
    /// adds all of them to the set.
    pub fn absorb<'a>(&mut self, chunks: impl IntoIterator<Item = &'a ChunkID>) -> Observation {
        let unique: FxHashSet<ChunkID> = chunks.into_iter().copied().collect();
        let mut new_chunks = 0;
        for chunk in &unique {
            if self.chunks.insert(*chunk) {
                new_chunks += 1;
            }
        }
        Observation {
            new_chunks,
            referenced_chunks: unique.len() as u64,
        }
    }

    pub fn contains(&self, chunk: &ChunkID) -> bool {
        self.chunks.contains(chunk)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupState {
    Unseen,
    Accumulating,
}

/// Owns one group's seen-set for the duration of its traversal.
///
/// Snapshots must arrive in ascending time order; an older snapshot after a
/// newer one is rejected. `finish` consumes the accumulator and releases the
/// seen-set.
#[derive(Debug)]
pub struct GroupAccumulator {
    group: BackupGroup,
    seen: SeenSet,
    last: Option<SnapshotTime>,
    tally: GroupTally,
}

impl GroupAccumulator {
    pub fn new(group: BackupGroup) -> Self {
        Self {
            group,
            seen: SeenSet::new(),
            last: None,
            tally: GroupTally::default(),
        }
    }

    pub fn group(&self) -> BackupGroup {
        self.group
    }

    pub fn state(&self) -> GroupState {
        if self.last.is_some() {
            GroupState::Accumulating
        } else {
            GroupState::Unseen
        }
    }

    pub fn seen_chunks(&self) -> usize {
        self.seen.len()
    }

    pub fn observe<'a>(
        &mut self,
        time: &SnapshotTime,
        chunks: impl IntoIterator<Item = &'a ChunkID>,
    ) -> Result<Observation> {
        if let Some(last) = &self.last {
            if time < last {
                return Err(Error::SnapshotOrder {
                    group: self.group.to_string(),
                    previous: last.to_string(),
                    current: time.to_string(),
                });
            }
        }

        let obs = self.seen.absorb(chunks);
        self.tally += obs;
        self.last = Some(time.clone());
        Ok(obs)
    }

    pub fn finish(self) -> GroupTally {
        self.tally
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BackupType;
    use crate::index::fixtures::chunk;

    fn time(name: &str) -> SnapshotTime {
        SnapshotTime::parse(name).unwrap()
    }

    fn vm100() -> GroupAccumulator {
        GroupAccumulator::new(BackupGroup::new(BackupType::Vm, 100))
    }

    #[test]
    fn test_consecutive_snapshots_share_chunks() {
        let mut acc = vm100();
        assert_eq!(acc.state(), GroupState::Unseen);

        let a = acc
            .observe(&time("2024-05-01T10:00:00Z"), &[chunk(1), chunk(2), chunk(3)])
            .unwrap();
        assert_eq!(a, Observation { new_chunks: 3, referenced_chunks: 3 });
        assert_eq!(acc.state(), GroupState::Accumulating);

        let b = acc
            .observe(&time("2024-05-02T10:00:00Z"), &[chunk(2), chunk(3), chunk(4)])
            .unwrap();
        assert_eq!(b, Observation { new_chunks: 1, referenced_chunks: 3 });
        assert_eq!(acc.seen_chunks(), 4);

        let tally = acc.finish();
        assert_eq!(tally.snapshots, 2);
        assert_eq!(tally.new_chunks, 4);
        assert_eq!(tally.referenced_chunks, 6);
    }

    #[test]
    fn test_repeated_chunk_counts_once() {
        let mut acc = vm100();
        let obs = acc
            .observe(&time("2024-05-01T10:00:00Z"), &[chunk(1), chunk(1), chunk(2)])
            .unwrap();
        assert_eq!(obs.referenced_chunks, 2);
        assert_eq!(obs.new_chunks, 2);
    }

    #[test]
    fn test_observing_same_snapshot_twice_adds_nothing() {
        let mut acc = vm100();
        let t = time("2024-05-01T10:00:00Z");
        let chunks = [chunk(1), chunk(2)];
        acc.observe(&t, &chunks).unwrap();
        let again = acc.observe(&t, &chunks).unwrap();
        assert_eq!(again.new_chunks, 0);
        assert_eq!(again.referenced_chunks, 2);
    }

    #[test]
    fn test_rejects_older_snapshot() {
        let mut acc = vm100();
        acc.observe(&time("2024-05-02T10:00:00Z"), &[chunk(1)]).unwrap();
        let err = acc
            .observe(&time("2024-05-01T10:00:00Z"), &[chunk(2)])
            .unwrap_err();
        assert!(matches!(err, Error::SnapshotOrder { ref group, .. } if group == "vm/100"));
        assert!(!acc.seen.contains(&chunk(2)));
    }

    #[test]
    fn test_observation_order_decides_credit() {
        let a = [chunk(1), chunk(2)];
        let b = [chunk(2), chunk(3)];

        let mut forward = SeenSet::new();
        let fa = forward.absorb(&a);
        let fb = forward.absorb(&b);

        let mut reverse = SeenSet::new();
        let rb = reverse.absorb(&b);
        let ra = reverse.absorb(&a);

        // chunk 2 is credited to whichever snapshot comes first
        assert_eq!((fa.new_chunks, fb.new_chunks), (2, 1));
        assert_eq!((rb.new_chunks, ra.new_chunks), (2, 1));
        assert_ne!(fa.new_chunks, ra.new_chunks);
        assert_eq!(fa.new_chunks + fb.new_chunks, rb.new_chunks + ra.new_chunks);
    }

    #[test]
    fn test_new_never_exceeds_referenced() {
        let histories: [&[u8]; 4] = [&[1, 2, 3], &[3, 3, 4, 5], &[], &[1, 5, 6, 6, 6]];
        let mut acc = vm100();
        let mut distinct = FxHashSet::default();
        let mut credited = 0;
        for (day, ids) in histories.iter().enumerate() {
            let chunks: Vec<ChunkID> = ids.iter().map(|n| chunk(*n)).collect();
            distinct.extend(chunks.iter().copied());
            let obs = acc
                .observe(&time(&format!("2024-05-0{}T10:00:00Z", day + 1)), &chunks)
                .unwrap();
            assert!(obs.new_chunks <= obs.referenced_chunks);
            credited += obs.new_chunks;
        }
        assert_eq!(credited, distinct.len() as u64);
    }
}
