//! Ontology oracle: is-a lookups over groundings.
//!
//! Refinement discovery asks one question of the ontology, over and over:
//! "is `child` a kind of `parent`?". Every corpus operation receives the
//! oracle it should use as an argument; there is no process-wide default.
//!
//! Lookup failures (unknown grounding, oracle unavailable) surface through
//! [`Ontology::lookup_is_a`] but are collapsed to "unrelated" by
//! [`Ontology::is_a`], which is what the linker calls.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;

use crate::statement::Grounding;

#[derive(Debug, thiserror::Error)]
pub enum OntologyError {
    #[error("grounding {0} is not in the ontology")]
    UnknownGrounding(Grounding),
    #[error("ontology unavailable: {0}")]
    Unavailable(String),
    #[error("invalid is-a edge on line {line}: {reason}")]
    Parse { line: usize, reason: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// An is-a relation over groundings.
pub trait Ontology: Send + Sync {
    /// Whether `child` is (transitively) a kind of `parent`.
    fn lookup_is_a(&self, child: &Grounding, parent: &Grounding) -> Result<bool, OntologyError>;

    /// Like [`lookup_is_a`](Self::lookup_is_a), with every failure read as "no".
    fn is_a(&self, child: &Grounding, parent: &Grounding) -> bool {
        match self.lookup_is_a(child, parent) {
            Ok(related) => related,
            Err(err) => {
                tracing::debug!(%child, %parent, error = %err, "is-a lookup failed; treating as unrelated");
                false
            }
        }
    }
}

impl<O: Ontology + ?Sized> Ontology for &O {
    fn lookup_is_a(&self, child: &Grounding, parent: &Grounding) -> Result<bool, OntologyError> {
        (**self).lookup_is_a(child, parent)
    }
}

impl<O: Ontology + ?Sized> Ontology for Arc<O> {
    fn lookup_is_a(&self, child: &Grounding, parent: &Grounding) -> Result<bool, OntologyError> {
        (**self).lookup_is_a(child, parent)
    }
}

impl<O: Ontology + ?Sized> Ontology for Box<O> {
    fn lookup_is_a(&self, child: &Grounding, parent: &Grounding) -> Result<bool, OntologyError> {
        (**self).lookup_is_a(child, parent)
    }
}

/// An ontology with no is-a edges. Refinement then reduces to state.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyOntology;

impl Ontology for EmptyOntology {
    fn lookup_is_a(&self, _child: &Grounding, _parent: &Grounding) -> Result<bool, OntologyError> {
        Ok(false)
    }
}

// ============================================================================
// Hierarchy snapshot
// ============================================================================

/// A direct is-a edge, as stored in JSON edge lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsAEdge {
    pub child: Grounding,
    pub parent: Grounding,
}

/// Immutable is-a hierarchy with its transitive closure precomputed.
#[derive(Debug, Clone, Default)]
pub struct Hierarchy {
    /// Every known grounding, mapped to all of its ancestors.
    ancestors: HashMap<Grounding, BTreeSet<Grounding>>,
    edge_count: usize,
}

impl Hierarchy {
    pub fn from_edges(edges: impl IntoIterator<Item = (Grounding, Grounding)>) -> Self {
        let mut parents: HashMap<Grounding, BTreeSet<Grounding>> = HashMap::new();
        let mut edge_count = 0;
        for (child, parent) in edges {
            parents.entry(parent.clone()).or_default();
            if parents.entry(child).or_default().insert(parent) {
                edge_count += 1;
            }
        }

        // Breadth-first closure per node; the visited set also cuts cycles.
        let ancestors = parents
            .keys()
            .map(|node| {
                let mut seen: BTreeSet<Grounding> = BTreeSet::new();
                let mut queue: VecDeque<&Grounding> = parents[node].iter().collect();
                while let Some(next) = queue.pop_front() {
                    if seen.insert(next.clone()) {
                        if let Some(up) = parents.get(next) {
                            queue.extend(up.iter());
                        }
                    }
                }
                (node.clone(), seen)
            })
            .collect();

        Self {
            ancestors,
            edge_count,
        }
    }

    /// Parse a tab- or whitespace-separated edge list:
    /// `child_ns:child_id <TAB> parent_ns:parent_id`, `#` starts a comment.
    pub fn parse_tsv(text: &str) -> Result<Self, OntologyError> {
        let mut edges = Vec::new();
        for (idx, line) in text.lines().enumerate() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let mut fields = line.split_whitespace();
            let (Some(child), Some(parent), None) = (fields.next(), fields.next(), fields.next())
            else {
                return Err(OntologyError::Parse {
                    line: idx + 1,
                    reason: "expected exactly two groundings".to_string(),
                });
            };
            let parse = |text: &str| {
                Grounding::parse(text).ok_or_else(|| OntologyError::Parse {
                    line: idx + 1,
                    reason: format!("`{text}` is not NS:ID"),
                })
            };
            edges.push((parse(child)?, parse(parent)?));
        }
        Ok(Self::from_edges(edges))
    }

    /// Parse a JSON array of [`IsAEdge`].
    pub fn from_json(text: &str) -> Result<Self, OntologyError> {
        let edges: Vec<IsAEdge> = serde_json::from_str(text)?;
        Ok(Self::from_edges(edges.into_iter().map(|e| (e.child, e.parent))))
    }

    /// Load from disk; `.json` files are JSON edge lists, anything else TSV.
    pub fn load(path: &Path) -> Result<Self, OntologyError> {
        let text = std::fs::read_to_string(path)?;
        let hierarchy = if path.extension().map_or(false, |e| e == "json") {
            Self::from_json(&text)?
        } else {
            Self::parse_tsv(&text)?
        };
        tracing::info!(
            path = %path.display(),
            groundings = hierarchy.len(),
            edges = hierarchy.edge_count,
            "loaded ontology"
        );
        Ok(hierarchy)
    }

    /// Number of groundings the hierarchy knows.
    pub fn len(&self) -> usize {
        self.ancestors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ancestors.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    pub fn contains(&self, grounding: &Grounding) -> bool {
        self.ancestors.contains_key(grounding)
    }

    pub fn ancestors(&self, grounding: &Grounding) -> Option<&BTreeSet<Grounding>> {
        self.ancestors.get(grounding)
    }
}

impl Ontology for Hierarchy {
    fn lookup_is_a(&self, child: &Grounding, parent: &Grounding) -> Result<bool, OntologyError> {
        let ancestors = self
            .ancestors
            .get(child)
            .ok_or_else(|| OntologyError::UnknownGrounding(child.clone()))?;
        Ok(ancestors.contains(parent))
    }
}

// ============================================================================
// Memoisation
// ============================================================================

/// Caches successful lookups of an inner oracle. Failures are not cached.
pub struct CachedOntology<O> {
    inner: O,
    cache: DashMap<(Grounding, Grounding), bool>,
}

impl<O: Ontology> CachedOntology<O> {
    pub fn new(inner: O) -> Self {
        Self {
            inner,
            cache: DashMap::new(),
        }
    }

    pub fn cached_lookups(&self) -> usize {
        self.cache.len()
    }

    pub fn into_inner(self) -> O {
        self.inner
    }
}

impl<O: Ontology> Ontology for CachedOntology<O> {
    fn lookup_is_a(&self, child: &Grounding, parent: &Grounding) -> Result<bool, OntologyError> {
        let key = (child.clone(), parent.clone());
        if let Some(hit) = self.cache.get(&key) {
            return Ok(*hit);
        }
        let related = self.inner.lookup_is_a(child, parent)?;
        self.cache.insert(key, related);
        Ok(related)
    }
}
