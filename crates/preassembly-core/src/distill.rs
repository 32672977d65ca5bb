//! Distillation: one canonical raw statement per (document, fingerprint).
//!
//! Several readers, and several versions of the same reader, may extract the
//! same fact from the same document. Before deduplication those copies are
//! collapsed to the instance the configured [`ReaderPreference`] ranks best.
//! Documents are independent, so each one is distilled on its own rayon task
//! and the kept ids are merged by union.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BTreeSet};

use crate::digest::Fingerprint;
use crate::statement::{Origin, RawId, RawStatement, TextType};

/// Readers in order of preference, best first. Unlisted readers rank last.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReaderPreference {
    readers: Vec<String>,
}

impl Default for ReaderPreference {
    fn default() -> Self {
        Self::new(["reach", "sparser", "medscan", "trips", "rlimsp", "isi"])
    }
}

impl ReaderPreference {
    pub fn new<S: Into<String>>(readers: impl IntoIterator<Item = S>) -> Self {
        Self {
            readers: readers.into_iter().map(|r| r.into().to_lowercase()).collect(),
        }
    }

    pub fn readers(&self) -> &[String] {
        &self.readers
    }

    fn reader_rank(&self, reader: &str) -> usize {
        self.readers
            .iter()
            .position(|r| r.eq_ignore_ascii_case(reader))
            .unwrap_or(self.readers.len())
    }

    /// Sort key for an origin; smaller is preferred.
    fn rank<'a>(&self, origin: &'a Origin) -> (usize, Reverse<Option<TextType>>, Reverse<Version<'a>>) {
        match origin {
            Origin::Reading {
                reader,
                reader_version,
                text_type,
                ..
            } => (
                self.reader_rank(reader),
                Reverse(Some(*text_type)),
                Reverse(Version(reader_version.as_str())),
            ),
            _ => (self.readers.len(), Reverse(None), Reverse(Version(""))),
        }
    }

    /// Order two candidates for the same fact; `Less` means `a` wins.
    pub fn compare(&self, a: (&Origin, RawId), b: (&Origin, RawId)) -> Ordering {
        self.rank(a.0)
            .cmp(&self.rank(b.0))
            .then_with(|| a.1.cmp(&b.1))
    }
}

/// Reader version compared component-wise, numerically where possible,
/// so `1.10.0` is newer than `1.9.2`.
#[derive(Debug, Clone, Copy)]
struct Version<'a>(&'a str);

impl<'a> Version<'a> {
    fn parts(&self) -> impl Iterator<Item = Result<u64, &'a str>> {
        self.0
            .split(|c: char| c == '.' || c == '-' || c == '_')
            .filter(|p| !p.is_empty())
            .map(|p| p.parse::<u64>().map_err(|_| p))
    }
}

impl Ord for Version<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        let mut left = self.parts();
        let mut right = other.parts();
        loop {
            match (left.next(), right.next()) {
                (None, None) => return Ordering::Equal,
                (None, Some(_)) => return Ordering::Less,
                (Some(_), None) => return Ordering::Greater,
                (Some(a), Some(b)) => {
                    let ord = match (a, b) {
                        (Ok(x), Ok(y)) => x.cmp(&y),
                        (Ok(_), Err(_)) => Ordering::Greater,
                        (Err(_), Ok(_)) => Ordering::Less,
                        (Err(x), Err(y)) => x.cmp(y),
                    };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
            }
        }
    }
}

impl PartialEq for Version<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version<'_> {}

impl PartialOrd for Version<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Anything distillation can rank: full raw statements, or the compact
/// summaries a store pages through.
pub trait Distillable: Sync {
    fn raw_id(&self) -> RawId;
    fn fingerprint(&self) -> Fingerprint;
    fn origin(&self) -> &Origin;

    /// Already part of the corpus. A linked copy of a fact always wins.
    fn is_linked(&self) -> bool {
        false
    }
}

impl Distillable for RawStatement {
    fn raw_id(&self) -> RawId {
        self.id()
    }

    fn fingerprint(&self) -> Fingerprint {
        RawStatement::fingerprint(self)
    }

    fn origin(&self) -> &Origin {
        RawStatement::origin(self)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistillStats {
    pub input: usize,
    pub documents: usize,
    pub kept: usize,
    /// Duplicates of a fact already extracted from the same document.
    pub dropped: usize,
}

struct Candidate<'a> {
    id: RawId,
    fingerprint: Fingerprint,
    origin: &'a Origin,
    linked: bool,
}

fn distill_document(candidates: &[Candidate<'_>], preference: &ReaderPreference) -> Vec<RawId> {
    let mut groups: BTreeMap<Fingerprint, Vec<&Candidate<'_>>> = BTreeMap::new();
    for candidate in candidates {
        groups.entry(candidate.fingerprint).or_default().push(candidate);
    }

    groups
        .into_values()
        .filter_map(|group| {
            if let Some(linked) = group.iter().find(|c| c.linked) {
                return Some(linked.id);
            }
            group
                .into_iter()
                .min_by(|a, b| preference.compare((a.origin, a.id), (b.origin, b.id)))
                .map(|c| c.id)
        })
        .collect()
}

/// Ids of the items that survive distillation.
///
/// Items without a reading origin always survive. When a (document,
/// fingerprint) group already has a linked member, that member is the only
/// survivor of the group.
pub fn distill_ids<T: Distillable>(
    items: &[T],
    preference: &ReaderPreference,
) -> (BTreeSet<RawId>, DistillStats) {
    let mut kept = BTreeSet::new();
    let mut documents: BTreeMap<&str, Vec<Candidate<'_>>> = BTreeMap::new();
    for item in items {
        let origin = item.origin();
        match origin.document_id() {
            Some(doc) => documents.entry(doc).or_default().push(Candidate {
                id: item.raw_id(),
                fingerprint: item.fingerprint(),
                origin,
                linked: item.is_linked(),
            }),
            None => {
                kept.insert(item.raw_id());
            }
        }
    }

    let per_document: Vec<RawId> = documents
        .par_iter()
        .flat_map_iter(|(_, candidates)| distill_document(candidates, preference))
        .collect();
    kept.extend(per_document);

    let survivors = items
        .iter()
        .filter(|item| kept.contains(&item.raw_id()))
        .count();
    let stats = DistillStats {
        input: items.len(),
        documents: documents.len(),
        kept: survivors,
        dropped: items.len() - survivors,
    };
    tracing::debug!(
        input = stats.input,
        documents = stats.documents,
        dropped = stats.dropped,
        "distilled statements"
    );
    (kept, stats)
}

/// Keep the canonical instance of every fact per document, in input order.
pub fn distill(
    raws: Vec<RawStatement>,
    preference: &ReaderPreference,
) -> (Vec<RawStatement>, DistillStats) {
    let (kept, stats) = distill_ids(&raws, preference);
    let raws = raws
        .into_iter()
        .filter(|raw| kept.contains(&raw.id()))
        .collect();
    (raws, stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statement::{Agent, Evidence, StatementKind};
    use uuid::Uuid;

    fn read(doc: &str, reader: &str, version: &str, text_type: TextType, id: u128) -> RawStatement {
        RawStatement::new(
            StatementKind::Activation,
            vec![
                Agent::new("BRAF").with_ref("HGNC", "1097"),
                Agent::new("MAP2K1").with_ref("HGNC", "6840"),
            ],
            Evidence::new(reader),
        )
        .unwrap()
        .with_id(Uuid::from_u128(id))
        .with_origin(Origin::Reading {
            document_id: doc.to_string(),
            reader: reader.to_string(),
            reader_version: version.to_string(),
            text_type,
        })
    }

    fn kept_ids(raws: Vec<RawStatement>) -> Vec<u128> {
        let (kept, _) = distill(raws, &ReaderPreference::default());
        kept.iter().map(|r| r.id().as_u128()).collect()
    }

    #[test]
    fn preferred_reader_wins_within_a_document() {
        let raws = vec![
            read("pmid:1", "sparser", "1", TextType::FullText, 1),
            read("pmid:1", "reach", "1", TextType::Abstract, 2),
            read("pmid:2", "sparser", "1", TextType::Abstract, 3),
        ];
        assert_eq!(kept_ids(raws), vec![2, 3]);
    }

    #[test]
    fn full_text_then_newest_version_break_ties() {
        let raws = vec![
            read("pmid:1", "reach", "1.9.2", TextType::FullText, 1),
            read("pmid:1", "reach", "1.10.0", TextType::FullText, 2),
            read("pmid:1", "reach", "2.0.0", TextType::Abstract, 3),
        ];
        assert_eq!(kept_ids(raws), vec![2]);
    }

    #[test]
    fn smallest_id_is_the_final_tiebreak() {
        let raws = vec![
            read("pmid:1", "reach", "1", TextType::FullText, 9),
            read("pmid:1", "reach", "1", TextType::FullText, 4),
        ];
        assert_eq!(kept_ids(raws), vec![4]);
    }

    #[test]
    fn non_reading_origins_pass_through() {
        let db = RawStatement::new(
            StatementKind::Activation,
            vec![
                Agent::new("BRAF").with_ref("HGNC", "1097"),
                Agent::new("MAP2K1").with_ref("HGNC", "6840"),
            ],
            Evidence::new("biopax"),
        )
        .unwrap()
        .with_origin(Origin::Database {
            name: "pc".into(),
        });
        let (kept, stats) = distill(vec![db.clone(), db], &ReaderPreference::default());
        assert_eq!(kept.len(), 2);
        assert_eq!(stats.documents, 0);
        assert_eq!(stats.dropped, 0);
    }

    struct Summary {
        id: RawId,
        fingerprint: Fingerprint,
        origin: Origin,
        linked: bool,
    }

    impl Distillable for Summary {
        fn raw_id(&self) -> RawId {
            self.id
        }
        fn fingerprint(&self) -> Fingerprint {
            self.fingerprint
        }
        fn origin(&self) -> &Origin {
            &self.origin
        }
        fn is_linked(&self) -> bool {
            self.linked
        }
    }

    #[test]
    fn linked_members_keep_their_group() {
        let stored = read("pmid:1", "sparser", "1", TextType::Title, 1);
        let better = read("pmid:1", "reach", "1", TextType::FullText, 2);
        let summaries: Vec<Summary> = [(&stored, true), (&better, false)]
            .into_iter()
            .map(|(raw, linked)| Summary {
                id: raw.id(),
                fingerprint: raw.fingerprint(),
                origin: raw.origin().clone(),
                linked,
            })
            .collect();
        let (kept, stats) = distill_ids(&summaries, &ReaderPreference::default());
        assert_eq!(kept.into_iter().collect::<Vec<_>>(), vec![stored.id()]);
        assert_eq!(stats.dropped, 1);
    }

    #[test]
    fn versions_compare_numerically() {
        assert!(Version("1.10.0") > Version("1.9.2"));
        assert!(Version("2") > Version("1.99"));
        assert!(Version("1.0.1") > Version("1.0"));
        assert_eq!(Version("1.0"), Version("1.0"));
    }
}
