//! Request orchestration: resolve the city, fetch its addresses, partition
//! them into routes and color each route.

use crate::core::colors::ColorAssigner;
use crate::core::municipality_index::MunicipalityIndex;
use crate::core::normalize::normalize;
use crate::core::partition::{partition, Partition, PartitionOptions};
use crate::core::resolver::{not_found, query_text, select, CityResolver};
use crate::core::streets::aggregate_streets;
use crate::domain::model::{
    Address, BalanceBy, Candidate, ClusterStats, ClusteringMethod, ColorPalette, Municipality,
    PlanOutcome, PlanRequest, PlanResponse, RoutePlan, RouteStop,
};
use crate::domain::ports::{AddressRepository, PlannerSettings};
use crate::utils::error::{Result, TractError};
use crate::utils::geo::haversine_m;
use crate::utils::validation::{validate_department, validate_range};
use std::collections::HashSet;
use std::sync::Arc;

/// City the request settled on, or every candidate when the name alone is
/// not enough to choose.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Resolved {
        candidate: Candidate,
        /// Better-scoring matches the department filter set aside.
        suggestions: Vec<Candidate>,
    },
    Ambiguous(Vec<Candidate>),
}

pub struct Planner<C: PlannerSettings> {
    index: Arc<MunicipalityIndex>,
    repository: Arc<dyn AddressRepository>,
    settings: C,
}

impl<C: PlannerSettings> Planner<C> {
    pub fn new(
        index: Arc<MunicipalityIndex>,
        repository: Arc<dyn AddressRepository>,
        settings: C,
    ) -> Self {
        Self {
            index,
            repository,
            settings,
        }
    }

    /// Same as [`Planner::plan`], with failures folded into a structured response.
    pub async fn plan_response(&self, request: &PlanRequest) -> PlanResponse {
        let result = self.plan(request).await;
        if let Err(e) = &result {
            tracing::warn!("Request failed ({:?}): {}", e.kind(), e);
        }
        PlanResponse::from(result)
    }

    pub async fn plan(&self, request: &PlanRequest) -> Result<PlanOutcome> {
        // 先檢查便宜的參數，再做任何 I/O
        let method: ClusteringMethod = request.clustering_method.parse()?;
        let balance_by = match request.balance_by.as_deref() {
            Some(criterion) => criterion.parse::<BalanceBy>()?,
            None => self.settings.balance_by(),
        };
        if request.cluster_nbr == 0 {
            return Err(TractError::InvalidQuery {
                message: "cluster_nbr must be a positive integer".to_string(),
            });
        }
        let colors = ColorAssigner::new(self.settings.saturation(), self.settings.value())?;

        let (chosen, suggestions) = match self.resolve(request)? {
            Resolution::Resolved {
                candidate,
                suggestions,
            } => (candidate, suggestions),
            Resolution::Ambiguous(candidates) => {
                tracing::info!(
                    "🔀 {} candidates for '{}', asking the caller to choose",
                    candidates.len(),
                    request.city_name.as_deref().unwrap_or_default()
                );
                return Ok(PlanOutcome::Ambiguous { candidates });
            }
        };
        let municipality = Arc::clone(&chosen.municipality);
        tracing::info!(
            "📍 Resolved {} ({}, department {})",
            municipality.name,
            municipality.postal_code,
            municipality.department_code
        );

        let records = self
            .repository
            .get_addresses(&municipality.department_code)
            .await?;
        let addresses: Vec<Address> = records
            .iter()
            .filter(|r| normalize(&r.municipality_name) == municipality.normalized_name)
            .map(|r| Address::from_record(r, &municipality))
            .collect();

        if addresses.is_empty() {
            return Err(TractError::EmptyAddressSet {
                city: municipality.name.clone(),
                department: municipality.department_code.clone(),
            });
        }
        tracing::info!("🏠 {} addresses in {}", addresses.len(), municipality.name);

        let options = PartitionOptions {
            seed: request.seed.unwrap_or_else(|| self.settings.seed()),
            max_iterations: self.settings.max_iterations(),
            balance_tolerance: self.settings.balance_tolerance(),
            balance_by,
        };
        let cluster_nbr = request.cluster_nbr;

        // k-means 是 CPU 密集工作，不佔用處理請求的執行緒
        let (addresses, outcome) = tokio::task::spawn_blocking(move || {
            let outcome = partition(&addresses, cluster_nbr, method, &options);
            (addresses, outcome)
        })
        .await
        .map_err(|e| TractError::WorkerError {
            message: e.to_string(),
        })?;
        let partition = outcome?;

        let palette = colors.assign(partition.cluster_count(), request.cluster_colors.as_deref())?;
        tracing::info!(
            "🎨 {} routes built with {} in {} iteration(s)",
            partition.cluster_count(),
            method,
            partition.iterations
        );

        let mut plan = build_plan(
            municipality,
            method,
            options.seed,
            &addresses,
            &partition,
            palette,
        );
        plan.suggestions = suggestions;
        Ok(PlanOutcome::Routes(plan))
    }

    /// Resolves the request's city and applies the department filter.
    ///
    /// With a department code, only candidates inside it are ranked, so an
    /// exact name elsewhere never hides a fuzzy match in the department.
    /// Better-scoring matches outside the department come back as
    /// suggestions. When nothing matches inside the department, those
    /// matches are reported with `CityNotFound`. Without a department,
    /// several candidates make the result ambiguous.
    pub fn resolve(&self, request: &PlanRequest) -> Result<Resolution> {
        let department = request
            .department_code
            .as_ref()
            .map(|d| validate_department(&d.as_text()))
            .transpose()?;

        let min_score = request.min_score.unwrap_or_else(|| self.settings.min_score());
        validate_range("min_score", min_score, 0.0, 100.0)?;

        let name = request.city_name.as_deref();
        let postal_code = request.postal_code.as_deref();
        let resolver = CityResolver::new(Arc::clone(&self.index));
        let scored = resolver.score(name, postal_code)?;

        let Some(department) = department else {
            let mut candidates = select(&scored, min_score);
            return match candidates.len() {
                0 => {
                    let query = query_text(name, postal_code);
                    tracing::info!("No municipality above {} for '{}'", min_score, query);
                    Err(not_found(query, &scored))
                }
                1 => Ok(Resolution::Resolved {
                    candidate: candidates.remove(0),
                    suggestions: Vec::new(),
                }),
                _ => Ok(Resolution::Ambiguous(candidates)),
            };
        };

        let (inside, outside): (Vec<Candidate>, Vec<Candidate>) = scored
            .into_iter()
            .partition(|c| c.municipality.department_code == department);
        let elsewhere = select(&outside, min_score);

        let Some(chosen) = select(&inside, min_score).into_iter().next() else {
            let query = format!("{} in department {}", query_text(name, postal_code), department);
            tracing::info!("No municipality above {} for '{}'", min_score, query);
            let pool = if elsewhere.is_empty() { &outside } else { &elsewhere };
            return Err(not_found(query, pool));
        };

        let suggestions: Vec<Candidate> = elsewhere
            .into_iter()
            .filter(|c| c.score > chosen.score)
            .collect();
        if !suggestions.is_empty() {
            tracing::info!(
                "💡 {} closer match(es) outside department {}, best: {} ({})",
                suggestions.len(),
                department,
                suggestions[0].municipality.name,
                suggestions[0].municipality.department_code
            );
        }
        Ok(Resolution::Resolved {
            candidate: chosen,
            suggestions,
        })
    }
}

fn build_plan(
    municipality: Arc<Municipality>,
    method: ClusteringMethod,
    seed: u64,
    addresses: &[Address],
    partition: &Partition,
    palette: ColorPalette,
) -> RoutePlan {
    let assignment = &partition.assignment;
    let color_of = |cluster_id: usize| palette.get(cluster_id).unwrap_or_default().to_string();

    // 街道長度按地址數分給各路線
    let mut lengths = vec![0.0; assignment.cluster_count()];
    for street in aggregate_streets(addresses) {
        let share = street.length_m / street.address_count() as f64;
        for &i in &street.members {
            lengths[assignment.labels()[i]] += share;
        }
    }

    let stops = addresses
        .iter()
        .zip(assignment.labels())
        .map(|(address, &cluster_id)| RouteStop {
            address_label: address.street_label.clone(),
            latitude: address.latitude,
            longitude: address.longitude,
            cluster_id,
            color: color_of(cluster_id),
        })
        .collect();

    let stats = (0..assignment.cluster_count())
        .map(|cluster_id| {
            let members = assignment.members(cluster_id);
            let streets: HashSet<&str> = members
                .iter()
                .map(|&i| addresses[i].street_name.as_str())
                .filter(|s| !s.is_empty())
                .collect();

            let (mut min_lat, mut max_lat) = (f64::INFINITY, f64::NEG_INFINITY);
            let (mut min_lon, mut max_lon) = (f64::INFINITY, f64::NEG_INFINITY);
            for &i in &members {
                min_lat = min_lat.min(addresses[i].latitude);
                max_lat = max_lat.max(addresses[i].latitude);
                min_lon = min_lon.min(addresses[i].longitude);
                max_lon = max_lon.max(addresses[i].longitude);
            }
            let [centroid_latitude, centroid_longitude] = partition.centroids[cluster_id];

            ClusterStats {
                cluster_id,
                color: color_of(cluster_id),
                address_count: members.len(),
                street_count: streets.len(),
                centroid_latitude,
                centroid_longitude,
                extent_m: haversine_m(min_lat, min_lon, max_lat, max_lon),
                total_length_m: lengths[cluster_id],
            }
        })
        .collect();

    RoutePlan {
        cluster_count: assignment.cluster_count(),
        municipality,
        method,
        seed,
        palette,
        stops,
        stats,
        suggestions: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::toml_config::TomlConfig;
    use crate::domain::model::{AddressRecord, DepartmentInput};
    use crate::utils::error::ErrorKind;
    use async_trait::async_trait;

    struct FixedRepository {
        records: Arc<Vec<AddressRecord>>,
    }

    #[async_trait]
    impl AddressRepository for FixedRepository {
        async fn get_addresses(&self, _department_code: &str) -> Result<Arc<Vec<AddressRecord>>> {
            Ok(Arc::clone(&self.records))
        }
    }

    fn record(label: &str, lat: f64, lon: f64, city: &str) -> AddressRecord {
        AddressRecord {
            street_label: label.to_string(),
            street_name: label.to_string(),
            house_number: None,
            latitude: lat,
            longitude: lon,
            municipality_name: city.to_string(),
        }
    }

    fn planner(records: Vec<AddressRecord>) -> Planner<TomlConfig> {
        let index = Arc::new(MunicipalityIndex::from_municipalities(vec![
            Municipality::new("Saint-Denis", "93200", "93"),
            Municipality::new("Saint-Denis", "97400", "974"),
            Municipality::new("Brest", "29200", "29"),
            Municipality::new("Marseille", "13001", "13"),
            Municipality::new("Marseillan", "34340", "34"),
        ]));
        let repository = Arc::new(FixedRepository {
            records: Arc::new(records),
        });
        Planner::new(index, repository, TomlConfig::default())
    }

    #[tokio::test]
    async fn test_ambiguous_name_returns_candidates() {
        let planner = planner(vec![]);
        let request = PlanRequest {
            city_name: Some("Saint-Denis".to_string()),
            ..PlanRequest::default()
        };
        match planner.plan(&request).await.unwrap() {
            PlanOutcome::Ambiguous { candidates } => assert_eq!(candidates.len(), 2),
            other => panic!("expected ambiguous outcome, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_department_disambiguates() {
        let planner = planner(vec![
            record("Rue de Paris", -20.88, 55.45, "Saint-Denis"),
            record("Rue Juliette Dodu", -20.89, 55.46, "Saint-Denis"),
        ]);
        let request = PlanRequest {
            city_name: Some("saint denis".to_string()),
            department_code: Some(DepartmentInput::Number(974)),
            cluster_nbr: 5,
            ..PlanRequest::default()
        };
        match planner.plan(&request).await.unwrap() {
            PlanOutcome::Routes(plan) => {
                assert_eq!(plan.municipality.department_code, "974");
                assert_eq!(plan.cluster_count, 2);
                assert_eq!(plan.palette.len(), 2);
                assert_eq!(plan.stops.len(), 2);
            }
            other => panic!("expected routes, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_department_conflict_reports_suggestions() {
        let planner = planner(vec![]);
        let request = PlanRequest {
            city_name: Some("Brest".to_string()),
            department_code: Some(DepartmentInput::from("13")),
            ..PlanRequest::default()
        };
        match planner.plan(&request).await {
            Err(TractError::CityNotFound { suggestions, .. }) => {
                assert_eq!(suggestions, vec!["29200 Brest (29)".to_string()]);
            }
            other => panic!("expected CityNotFound, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_department_rejected() {
        let planner = planner(vec![]);
        let request = PlanRequest {
            city_name: Some("Brest".to_string()),
            department_code: Some(DepartmentInput::from("96")),
            ..PlanRequest::default()
        };
        let err = planner.plan(&request).await.unwrap_err();
        assert!(matches!(err, TractError::InvalidDepartment { .. }));
    }

    #[tokio::test]
    async fn test_no_address_for_city_aborts() {
        let planner = planner(vec![record("Rue A", 48.39, -4.48, "Guipavas")]);
        let request = PlanRequest {
            city_name: Some("Brest".to_string()),
            ..PlanRequest::default()
        };
        let response = planner.plan_response(&request).await;
        match response {
            PlanResponse::Failed(failure) => assert_eq!(failure.kind, ErrorKind::EmptyAddressSet),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unsupported_method_fails_before_io() {
        let planner = planner(vec![]);
        let request = PlanRequest {
            city_name: Some("Brest".to_string()),
            clustering_method: "dbscan".to_string(),
            ..PlanRequest::default()
        };
        let err = planner.plan(&request).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedMethod);
    }

    #[tokio::test]
    async fn test_palette_mismatch_aborts_whole_request() {
        let planner = planner(vec![
            record("Rue A", 48.390, -4.480, "Brest"),
            record("Rue B", 48.391, -4.481, "Brest"),
            record("Rue C", 48.400, -4.500, "Brest"),
        ]);
        let request = PlanRequest {
            city_name: Some("Brest".to_string()),
            cluster_nbr: 2,
            cluster_colors: Some(vec!["#FF0000".to_string()]),
            ..PlanRequest::default()
        };
        let err = planner.plan(&request).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PaletteSizeMismatch);
    }

    #[tokio::test]
    async fn test_stats_cover_every_address() {
        let planner = planner(vec![
            record("Rue A", 48.390, -4.480, "Brest"),
            record("Rue A", 48.3901, -4.4801, "Brest"),
            record("Rue B", 48.420, -4.520, "Brest"),
            record("Rue C", 48.4201, -4.5201, "BREST"),
        ]);
        let request = PlanRequest {
            city_name: Some("Brest".to_string()),
            cluster_nbr: 2,
            ..PlanRequest::default()
        };
        let PlanOutcome::Routes(plan) = planner.plan(&request).await.unwrap() else {
            panic!("expected routes");
        };
        let total: usize = plan.stats.iter().map(|s| s.address_count).sum();
        assert_eq!(total, 4);
        assert_eq!(plan.stats[0].street_count, 1);
        assert_eq!(plan.stats[1].street_count, 2);
        assert!(plan.stats.iter().all(|s| s.extent_m < 100.0));

        // 只有 Rue A 有長度，單一地址的街道為 0
        let rue_a = haversine_m(48.390, -4.480, 48.3901, -4.4801);
        assert!((plan.stats[0].total_length_m - rue_a).abs() < 1e-6);
        assert_eq!(plan.stats[1].total_length_m, 0.0);
        assert!(plan.suggestions.is_empty());
    }

    fn marseillan() -> Vec<AddressRecord> {
        vec![
            record("Quai de la Résistance", 43.3530, 3.5300, "Marseillan"),
            record("Quai de la Résistance", 43.3531, 3.5301, "Marseillan"),
            record("Rue de la Mairie", 43.3560, 3.5330, "Marseillan"),
        ]
    }

    #[tokio::test]
    async fn test_exact_name_elsewhere_does_not_hide_department_match() {
        let planner = planner(marseillan());
        let request = PlanRequest {
            city_name: Some("Marseille".to_string()),
            department_code: Some(DepartmentInput::Number(34)),
            ..PlanRequest::default()
        };
        let PlanOutcome::Routes(plan) = planner.plan(&request).await.unwrap() else {
            panic!("expected routes");
        };
        assert_eq!(plan.municipality.name, "Marseillan");
        assert_eq!(plan.stops.len(), 3);
        assert_eq!(plan.suggestions.len(), 1);
        assert_eq!(plan.suggestions[0].municipality.name, "Marseille");
        assert_eq!(plan.suggestions[0].score, 100.0);
    }

    #[tokio::test]
    async fn test_better_match_outside_department_is_suggested() {
        let planner = planner(marseillan());
        let request = PlanRequest {
            city_name: Some("Marseile".to_string()),
            department_code: Some(DepartmentInput::from("34")),
            ..PlanRequest::default()
        };
        match planner.resolve(&request).unwrap() {
            Resolution::Resolved {
                candidate,
                suggestions,
            } => {
                assert_eq!(candidate.municipality.name, "Marseillan");
                assert_eq!(suggestions.len(), 1);
                assert_eq!(suggestions[0].municipality.department_code, "13");
                assert!(suggestions[0].score > candidate.score);
            }
            other => panic!("expected a resolved city, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_no_department_means_no_suggestions() {
        let planner = planner(vec![]);
        let request = PlanRequest {
            city_name: Some("Marseille".to_string()),
            ..PlanRequest::default()
        };
        match planner.resolve(&request).unwrap() {
            Resolution::Resolved {
                candidate,
                suggestions,
            } => {
                assert_eq!(candidate.municipality.department_code, "13");
                assert!(suggestions.is_empty());
            }
            other => panic!("expected a resolved city, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_balance_criterion_fails_before_io() {
        let planner = planner(vec![]);
        let request = PlanRequest {
            city_name: Some("Brest".to_string()),
            clustering_method: "balanced_kmeans".to_string(),
            balance_by: Some("weight".to_string()),
            ..PlanRequest::default()
        };
        let err = planner.plan(&request).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidQuery);
    }

    #[tokio::test]
    async fn test_balanced_routes_report_street_lengths() {
        let mut records = marseillan();
        records.push(record("Chemin des Étangs", 43.3700, 3.5500, "Marseillan"));
        let planner = planner(records);
        let request = PlanRequest {
            city_name: Some("Marseillan".to_string()),
            cluster_nbr: 2,
            clustering_method: "balanced_kmeans".to_string(),
            ..PlanRequest::default()
        };
        let PlanOutcome::Routes(plan) = planner.plan(&request).await.unwrap() else {
            panic!("expected routes");
        };
        assert_eq!(plan.cluster_count, 2);
        // 同一條街的兩個地址在同一路線
        assert_eq!(plan.stops[0].cluster_id, plan.stops[1].cluster_id);

        let quai = haversine_m(43.3530, 3.5300, 43.3531, 3.5301);
        let total: f64 = plan.stats.iter().map(|s| s.total_length_m).sum();
        assert!((total - quai).abs() < 1e-6);
    }
}
