//! Free-text city / postal code resolution against the municipality index.

use crate::core::municipality_index::MunicipalityIndex;
use crate::core::normalize::{normalize, similarity};
use crate::domain::model::{Candidate, Municipality};
use crate::utils::error::{Result, TractError};
use crate::utils::validation::is_valid_department;
use std::cmp::Ordering;
use std::sync::Arc;

pub const DEFAULT_MIN_SCORE: f64 = 60.0;
pub const PERFECT_SCORE: f64 = 100.0;
const MAX_SUGGESTIONS: usize = 3;

pub struct CityResolver {
    index: Arc<MunicipalityIndex>,
    min_score: f64,
}

impl CityResolver {
    pub fn new(index: Arc<MunicipalityIndex>) -> Self {
        Self {
            index,
            min_score: DEFAULT_MIN_SCORE,
        }
    }

    pub fn with_min_score(mut self, min_score: f64) -> Self {
        self.min_score = min_score;
        self
    }

    pub fn min_score(&self) -> f64 {
        self.min_score
    }

    pub fn resolve(&self, name: Option<&str>, postal_code: Option<&str>) -> Result<Vec<Candidate>> {
        self.resolve_with_threshold(name, postal_code, self.min_score)
    }

    /// Ranked candidates scoring at least `min_score`.
    ///
    /// A postal code narrows the search only when it matches at least one
    /// municipality; otherwise the name alone is scored. An empty result is
    /// reported as `CityNotFound`, never as an empty success.
    pub fn resolve_with_threshold(
        &self,
        name: Option<&str>,
        postal_code: Option<&str>,
        min_score: f64,
    ) -> Result<Vec<Candidate>> {
        let scored = self.score(name, postal_code)?;
        let candidates = select(&scored, min_score);

        if candidates.is_empty() {
            let query = query_text(name, postal_code);
            tracing::info!("No municipality above {} for '{}'", min_score, query);
            return Err(not_found(query, &scored));
        }

        tracing::debug!(
            "Resolved {} candidate(s), best: {} ({:.1})",
            candidates.len(),
            candidates[0].municipality.name,
            candidates[0].score
        );
        Ok(candidates)
    }

    /// Every municipality of the search pool with its score, best first.
    ///
    /// No threshold is applied. Municipalities whose department code is not
    /// a valid French department are left out.
    pub fn score(&self, name: Option<&str>, postal_code: Option<&str>) -> Result<Vec<Candidate>> {
        let query = name.map(normalize).filter(|q| !q.is_empty());
        let postal_code = postal_code.map(str::trim).filter(|p| !p.is_empty());

        if query.is_none() && postal_code.is_none() {
            return Err(TractError::InvalidQuery {
                message: "either a city name or a postal code is required".to_string(),
            });
        }

        let by_postal = postal_code
            .map(|code| self.index.lookup_by_postal_code(code))
            .unwrap_or_default();

        if let Some(code) = postal_code {
            if by_postal.is_empty() {
                tracing::debug!("Postal code {} matches nothing, falling back to name only", code);
            }
        }

        let pool: Vec<Arc<Municipality>> = if !by_postal.is_empty() {
            by_postal
        } else if query.is_some() {
            self.index.iter().cloned().collect()
        } else {
            Vec::new()
        };

        let mut scored: Vec<Candidate> = pool
            .into_iter()
            .filter(|m| {
                let valid = is_valid_department(&m.department_code);
                if !valid {
                    tracing::warn!(
                        "Dropping {} ({}): inconsistent department code '{}'",
                        m.name,
                        m.postal_code,
                        m.department_code
                    );
                }
                valid
            })
            .map(|m| {
                let score = match &query {
                    Some(q) => similarity(q, &m.normalized_name),
                    None => PERFECT_SCORE,
                };
                Candidate {
                    municipality: m,
                    score,
                }
            })
            .collect();
        sort_candidates(&mut scored);
        Ok(scored)
    }
}

/// Sorted candidates scoring at least `min_score`. When an exact name is
/// among them, only exact names are kept.
pub fn select(scored: &[Candidate], min_score: f64) -> Vec<Candidate> {
    let mut candidates: Vec<Candidate> = scored
        .iter()
        .filter(|c| c.score >= min_score)
        .cloned()
        .collect();

    // 有完全相符的名稱時只保留完全相符者
    if candidates.iter().any(|c| c.score >= PERFECT_SCORE) {
        candidates.retain(|c| c.score >= PERFECT_SCORE);
    }
    candidates
}

/// `CityNotFound` listing the best few of `scored` as suggestions.
pub fn not_found(query: String, scored: &[Candidate]) -> TractError {
    TractError::CityNotFound {
        query,
        suggestions: scored
            .iter()
            .filter(|c| c.score > 0.0)
            .take(MAX_SUGGESTIONS)
            .map(describe)
            .collect(),
    }
}

pub fn query_text(name: Option<&str>, postal_code: Option<&str>) -> String {
    let postal_code = postal_code.map(str::trim).filter(|p| !p.is_empty());
    match (name.map(str::trim), postal_code) {
        (Some(n), Some(p)) => format!("{} {}", n, p),
        (Some(n), None) => n.to_string(),
        (None, Some(p)) => p.to_string(),
        (None, None) => String::new(),
    }
}

/// Descending score, then ascending postal code, department code, name.
pub fn sort_candidates(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.municipality.postal_code.cmp(&b.municipality.postal_code))
            .then_with(|| a.municipality.department_code.cmp(&b.municipality.department_code))
            .then_with(|| a.municipality.name.cmp(&b.municipality.name))
    });
}

pub fn describe(candidate: &Candidate) -> String {
    format!(
        "{} {} ({})",
        candidate.municipality.postal_code,
        candidate.municipality.name,
        candidate.municipality.department_code
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::error::ErrorKind;

    fn fixture() -> Arc<MunicipalityIndex> {
        Arc::new(MunicipalityIndex::from_municipalities(vec![
            Municipality::new("Paris", "75001", "75"),
            Municipality::new("Marseille", "13001", "13"),
            Municipality::new("Marseillan", "34340", "34"),
            Municipality::new("Lyon", "69001", "69"),
            Municipality::new("Saint-Denis", "97400", "974"),
            Municipality::new("Saint-Denis", "93200", "93"),
            Municipality::new("Ajaccio", "20000", "2A"),
            Municipality::new("Nowhere", "96000", "96"),
        ]))
    }

    #[test]
    fn test_exact_name_keeps_only_exact_matches() {
        let resolver = CityResolver::new(fixture());
        let candidates = resolver.resolve(Some("marseille"), None).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].municipality.department_code, "13");
        assert_eq!(candidates[0].score, 100.0);
    }

    #[test]
    fn test_typo_ranks_by_score() {
        let resolver = CityResolver::new(fixture());
        let candidates = resolver.resolve(Some("Marseile"), None).unwrap();
        assert_eq!(candidates[0].municipality.name, "Marseille");
        assert!(candidates.iter().all(|c| c.score >= DEFAULT_MIN_SCORE));
    }

    #[test]
    fn test_ties_broken_by_postal_code() {
        let resolver = CityResolver::new(fixture());
        let candidates = resolver.resolve(Some("saint denis"), None).unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].municipality.postal_code, "93200");
        assert_eq!(candidates[1].municipality.postal_code, "97400");
    }

    #[test]
    fn test_postal_code_narrows_pool() {
        let resolver = CityResolver::new(fixture());
        let candidates = resolver.resolve(Some("Saint-Denis"), Some("97400")).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].municipality.department_code, "974");
    }

    #[test]
    fn test_unknown_postal_code_falls_back_to_name() {
        let resolver = CityResolver::new(fixture());
        let candidates = resolver.resolve(Some("Lyon"), Some("99999")).unwrap();
        assert_eq!(candidates[0].municipality.name, "Lyon");
    }

    #[test]
    fn test_invalid_department_is_dropped() {
        let resolver = CityResolver::new(fixture());
        let err = resolver.resolve(Some("Nowhere"), None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CityNotFound);
    }

    #[test]
    fn test_empty_query_is_invalid() {
        let resolver = CityResolver::new(fixture());
        let err = resolver.resolve(Some("  "), None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidQuery);
    }

    #[test]
    fn test_not_found_carries_suggestions_but_no_match() {
        let resolver = CityResolver::new(fixture()).with_min_score(95.0);
        match resolver.resolve(Some("Pariss"), None) {
            Err(TractError::CityNotFound { suggestions, .. }) => {
                assert!(suggestions[0].contains("Paris"));
            }
            other => panic!("expected CityNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_score_keeps_every_valid_candidate() {
        let resolver = CityResolver::new(fixture());
        let scored = resolver.score(Some("Marseille"), None).unwrap();
        assert_eq!(scored.len(), 7);
        assert_eq!(scored[0].municipality.name, "Marseille");
        assert_eq!(scored[1].municipality.name, "Marseillan");
        assert!(scored[1].score >= DEFAULT_MIN_SCORE && scored[1].score < PERFECT_SCORE);

        // 完全相符者會蓋過其他候選
        let selected = select(&scored, DEFAULT_MIN_SCORE);
        assert_eq!(selected.len(), 1);
        let others: Vec<Candidate> = scored[1..].to_vec();
        assert_eq!(select(&others, DEFAULT_MIN_SCORE)[0].municipality.name, "Marseillan");
    }

    #[test]
    fn test_query_text() {
        assert_eq!(query_text(Some(" Lyon "), Some("69001")), "Lyon 69001");
        assert_eq!(query_text(None, Some(" 97400 ")), "97400");
        assert_eq!(query_text(Some("Brest"), Some("  ")), "Brest");
    }

    #[test]
    fn test_lowered_threshold_opts_in() {
        let resolver = CityResolver::new(fixture()).with_min_score(95.0);
        let candidates = resolver
            .resolve_with_threshold(Some("Pariss"), None, 60.0)
            .unwrap();
        assert_eq!(candidates[0].municipality.name, "Paris");
    }
}
