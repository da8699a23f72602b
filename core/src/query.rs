use crate::distance::bounded_distance;
use crate::store::IndexStore;
use crate::{DocId, Result, ServiceType};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchHit {
    pub id: DocId,
    pub service_type: ServiceType,
    pub score: i32,
}

/// Read side of an index: ranked hits, counts, spelling suggestions and
/// removal of hits for documents that no longer exist.
pub struct Searcher {
    index: Arc<IndexStore>,
    suggest_budget: Duration,
}

impl Searcher {
    pub const SUGGEST_TIME_BUDGET: Duration = Duration::from_secs(2);

    pub fn new(index: Arc<IndexStore>) -> Self {
        Self { index, suggest_budget: Self::SUGGEST_TIME_BUDGET }
    }

    pub fn with_suggest_budget(mut self, budget: Duration) -> Self {
        self.suggest_budget = budget;
        self
    }

    pub fn index(&self) -> &IndexStore {
        &self.index
    }

    /// Documents holding every term, scores summed across terms. An empty
    /// `services` slice admits all service types.
    fn matches(&self, terms: &[&str], services: &[ServiceType]) -> HashMap<DocId, SearchHit> {
        let mut acc: Option<HashMap<DocId, SearchHit>> = None;
        for term in terms {
            let mut current = HashMap::new();
            // Later records for the same document supersede earlier ones.
            for record in self.index.get(term) {
                let service_type = record.service_type();
                if !services.is_empty() && !services.contains(&service_type) {
                    continue;
                }
                let hit = SearchHit { id: record.id, service_type, score: record.score() };
                current.insert(record.id, hit);
            }
            let merged = match acc {
                None => current,
                Some(prev) => prev
                    .into_iter()
                    .filter_map(|(id, mut hit)| {
                        current.get(&id).map(|other| {
                            hit.score += other.score;
                            (id, hit)
                        })
                    })
                    .collect(),
            };
            let done = merged.is_empty();
            acc = Some(merged);
            if done {
                break;
            }
        }
        acc.unwrap_or_default()
    }

    pub fn hit_count(&self, terms: &[&str], services: &[ServiceType]) -> usize {
        self.matches(terms, services).len()
    }

    /// Hits ordered by score (highest first, ties by document id), paged.
    pub fn hits(
        &self,
        terms: &[&str],
        services: &[ServiceType],
        offset: usize,
        limit: usize,
    ) -> Vec<SearchHit> {
        let mut ranked: Vec<SearchHit> = self.matches(terms, services).into_values().collect();
        ranked.sort_by(|a, b| b.score.cmp(&a.score).then(a.id.cmp(&b.id)));
        ranked.into_iter().skip(offset).take(limit).collect()
    }

    /// Matching documents per service type, in service-type order.
    pub fn hit_counts_by_service(&self, terms: &[&str]) -> Vec<(ServiceType, usize)> {
        let mut counts: BTreeMap<ServiceType, usize> = BTreeMap::new();
        for hit in self.matches(terms, &[]).into_values() {
            *counts.entry(hit.service_type).or_insert(0) += 1;
        }
        counts.into_iter().collect()
    }

    /// Closest indexed term within `max_distance` (exclusive) that still
    /// has hits, or `term` itself when nothing qualifies.
    ///
    /// The scan stops after the suggestion time budget and returns the best
    /// found so far. `None` only when the index cannot be read.
    pub fn suggest(&self, term: &str, max_distance: usize) -> Option<String> {
        let candidates = match self.index.terms() {
            Ok(terms) => terms,
            Err(err) => {
                tracing::warn!(term, error = %err, "cannot list index terms for suggestion");
                return None;
            }
        };

        let started = Instant::now();
        let mut winner: Option<(String, usize)> = None;
        for candidate in candidates {
            if let Some(dist) = bounded_distance(term, &candidate) {
                let best = winner.as_ref().map_or(usize::MAX, |(_, d)| *d);
                if dist < max_distance && dist < best {
                    if self.index.hit_count(&candidate) > 0 {
                        winner = Some((candidate, dist));
                    } else {
                        tracing::debug!(candidate = %candidate, "suggestion candidate has no hits");
                    }
                }
            }
            if started.elapsed() >= self.suggest_budget {
                tracing::info!(term, "suggestion search hit its time budget");
                break;
            }
        }

        Some(winner.map(|(w, _)| w).unwrap_or_else(|| term.to_string()))
    }

    pub fn remove_dud_hits(&self, term: &str, stale: &[DocId]) -> Result<usize> {
        self.index.remove_dud_hits(term, stale)
    }
}
