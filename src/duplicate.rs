use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::PathBuf;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::hash;
use crate::record::ImageRecord;

/// A set of two or more visually duplicate images.
///
/// `members` is ordered best-first under [`quality_order`]; the first member
/// is the representative to keep. Groups within one report are disjoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateGroup {
    /// 1-based position in the report's group ordering.
    pub id: usize,
    pub kind: DuplicateKind,
    pub members: Vec<ImageRecord>,
    /// Sum of the non-representative members' sizes.
    pub reclaimable_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateKind {
    /// Every member is byte-identical.
    Exact,
    /// Members are perceptually similar but not byte-identical.
    Similar,
}

impl DuplicateGroup {
    pub fn representative(&self) -> &ImageRecord {
        // members is non-empty by construction
        &self.members[0]
    }

    pub fn duplicates(&self) -> &[ImageRecord] {
        &self.members[1..]
    }
}

/// Total order for picking the group representative: larger pixel area wins,
/// then larger byte size, then lexicographically smaller path. Paths are
/// unique within a scan, so no two distinct records compare equal.
pub fn quality_order(a: &ImageRecord, b: &ImageRecord) -> Ordering {
    b.pixel_area()
        .cmp(&a.pixel_area())
        .then_with(|| b.size_bytes.cmp(&a.size_bytes))
        .then_with(|| a.path.cmp(&b.path))
}

/// Union-find over record indices with union by rank and path compression.
struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut cur = x;
        while self.parent[cur] != root {
            let next = self.parent[cur];
            self.parent[cur] = root;
            cur = next;
        }
        root
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            Ordering::Less => self.parent[ra] = rb,
            Ordering::Greater => self.parent[rb] = ra,
            Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }
}

/// Partition fingerprinted records into duplicate groups.
///
/// Similarity is transitive here: if A ~ B and B ~ C, all three share a group
/// even when dist(A, C) exceeds the threshold. Chains of re-compressed copies
/// drift apart pairwise but still belong together. Records without a
/// fingerprint are skipped; the caller reports them as failures.
///
/// The result is deterministic for a given record ordering; the scanner sorts
/// records by path before calling so worker completion order cannot leak in.
pub fn build_groups(
    records: &[ImageRecord],
    max_distance: u32,
    min_group_size: usize,
) -> Vec<DuplicateGroup> {
    let candidates: Vec<(usize, crate::fingerprint::Fingerprint)> = records
        .iter()
        .enumerate()
        .filter_map(|(i, r)| r.fingerprint.map(|fp| (i, fp)))
        .collect();

    let mut uf = UnionFind::new(records.len());
    for (a_pos, &(a, fa)) in candidates.iter().enumerate() {
        for &(b, fb) in &candidates[a_pos + 1..] {
            let d = fa.distance(&fb);
            // Distance 0 always groups, regardless of how tight the
            // threshold is.
            if d == 0 || d <= max_distance {
                uf.union(a, b);
            }
        }
    }

    // Gather components in first-member order.
    let mut components: HashMap<usize, Vec<usize>> = HashMap::new();
    let mut roots_in_order: Vec<usize> = Vec::new();
    for &(i, _) in &candidates {
        let root = uf.find(i);
        let entry = components.entry(root).or_default();
        if entry.is_empty() {
            roots_in_order.push(root);
        }
        entry.push(i);
    }

    let mut groups: Vec<(PathBuf, DuplicateGroup)> = Vec::new();
    for root in roots_in_order {
        let indices = &components[&root];
        if indices.len() < min_group_size.max(2) {
            continue;
        }

        let first_path = records[indices[0]].path.clone();
        let mut members: Vec<ImageRecord> =
            indices.iter().map(|&i| records[i].clone()).collect();
        members.sort_by(quality_order);

        let reclaimable_bytes = members[1..].iter().map(|r| r.size_bytes).sum();
        let kind = classify(&members);

        groups.push((
            first_path,
            DuplicateGroup {
                id: 0,
                kind,
                members,
                reclaimable_bytes,
            },
        ));
    }

    // Biggest savings first; ties broken by the group's first-discovered path.
    groups.sort_by(|(pa, ga), (pb, gb)| {
        gb.reclaimable_bytes
            .cmp(&ga.reclaimable_bytes)
            .then_with(|| pa.cmp(pb))
    });

    let mut ordered: Vec<DuplicateGroup> = groups.into_iter().map(|(_, g)| g).collect();
    for (i, group) in ordered.iter_mut().enumerate() {
        group.id = i + 1;
    }

    debug!("built {} duplicate groups", ordered.len());
    ordered
}

/// Exact when every member's file content hashes to the same digest. Any
/// hashing failure downgrades to Similar rather than failing the scan.
fn classify(members: &[ImageRecord]) -> DuplicateKind {
    let mut first: Option<String> = None;
    for member in members {
        match hash::content_hash(&member.path) {
            Ok(digest) => match &first {
                None => first = Some(digest),
                Some(expected) if *expected == digest => {}
                Some(_) => return DuplicateKind::Similar,
            },
            Err(_) => return DuplicateKind::Similar,
        }
    }
    DuplicateKind::Exact
}
