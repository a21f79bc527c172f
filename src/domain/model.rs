use crate::utils::error::{ErrorKind, Result, TractError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Municipality {
    pub name: String,
    pub postal_code: String,
    pub department_code: String,
    /// 僅供比對使用
    #[serde(skip)]
    pub normalized_name: String,
}

/// Raw address row as handed over by an address repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressRecord {
    pub street_label: String,
    pub street_name: String,
    /// 門牌號碼（不含 bis/ter），缺漏或非數字時為 None
    #[serde(default)]
    pub house_number: Option<u32>,
    pub latitude: f64,
    pub longitude: f64,
    pub municipality_name: String,
}

#[derive(Debug, Clone)]
pub struct Address {
    pub street_label: String,
    pub street_name: String,
    pub house_number: Option<u32>,
    pub latitude: f64,
    pub longitude: f64,
    pub municipality: Arc<Municipality>,
}

impl Address {
    pub fn from_record(record: &AddressRecord, municipality: &Arc<Municipality>) -> Self {
        Self {
            street_label: record.street_label.clone(),
            street_name: record.street_name.clone(),
            house_number: record.house_number,
            latitude: record.latitude,
            longitude: record.longitude,
            municipality: Arc::clone(municipality),
        }
    }
}

/// Cluster id per address, indexed by the address position in the input.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClusterAssignment {
    labels: Vec<usize>,
    cluster_count: usize,
}

impl ClusterAssignment {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Labels must already be contiguous in `[0, cluster_count)`.
    pub(crate) fn from_labels(labels: Vec<usize>, cluster_count: usize) -> Self {
        debug_assert!(labels.iter().all(|&c| c < cluster_count));
        Self {
            labels,
            cluster_count,
        }
    }

    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    pub fn cluster_count(&self) -> usize {
        self.cluster_count
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.cluster_count];
        for &label in &self.labels {
            sizes[label] += 1;
        }
        sizes
    }

    pub fn members(&self, cluster_id: usize) -> Vec<usize> {
        self.labels
            .iter()
            .enumerate()
            .filter(|(_, &label)| label == cluster_id)
            .map(|(i, _)| i)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorPalette(Vec<String>);

impl ColorPalette {
    pub fn new(colors: Vec<String>) -> Self {
        Self(colors)
    }

    pub fn colors(&self) -> &[String] {
        &self.0
    }

    pub fn get(&self, cluster_id: usize) -> Option<&str> {
        self.0.get(cluster_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    #[serde(flatten)]
    pub municipality: Arc<Municipality>,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusteringMethod {
    #[serde(rename = "kmeans")]
    KMeans,
    #[serde(rename = "balanced_kmeans")]
    BalancedKMeans,
}

impl ClusteringMethod {
    pub const SUPPORTED: [&'static str; 2] = ["kmeans", "balanced_kmeans"];

    pub fn as_str(&self) -> &'static str {
        match self {
            ClusteringMethod::KMeans => "kmeans",
            ClusteringMethod::BalancedKMeans => "balanced_kmeans",
        }
    }
}

impl fmt::Display for ClusteringMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClusteringMethod {
    type Err = TractError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "kmeans" | "k-means" => Ok(ClusteringMethod::KMeans),
            "balanced_kmeans" | "balanced" => Ok(ClusteringMethod::BalancedKMeans),
            _ => Err(TractError::UnsupportedMethod {
                method: s.to_string(),
                supported: Self::SUPPORTED.join(", "),
            }),
        }
    }
}

/// What `balanced_kmeans` evens out across routes: the number of addresses
/// or the estimated walking length of the streets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceBy {
    #[default]
    Count,
    Length,
}

impl BalanceBy {
    pub const SUPPORTED: [&'static str; 2] = ["count", "length"];

    pub fn as_str(&self) -> &'static str {
        match self {
            BalanceBy::Count => "count",
            BalanceBy::Length => "length",
        }
    }
}

impl fmt::Display for BalanceBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BalanceBy {
    type Err = TractError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "count" => Ok(BalanceBy::Count),
            "length" => Ok(BalanceBy::Length),
            _ => Err(TractError::InvalidQuery {
                message: format!(
                    "unknown balance criterion '{}' (supported: {})",
                    s,
                    Self::SUPPORTED.join(", ")
                ),
            }),
        }
    }
}

/// 省代碼可能以整數或字串傳入
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DepartmentInput {
    Number(u32),
    Text(String),
}

impl DepartmentInput {
    pub fn as_text(&self) -> String {
        match self {
            DepartmentInput::Number(n) => n.to_string(),
            DepartmentInput::Text(s) => s.clone(),
        }
    }
}

impl From<&str> for DepartmentInput {
    fn from(value: &str) -> Self {
        DepartmentInput::Text(value.to_string())
    }
}

impl From<u32> for DepartmentInput {
    fn from(value: u32) -> Self {
        DepartmentInput::Number(value)
    }
}

fn default_cluster_nbr() -> usize {
    1
}

fn default_method() -> String {
    ClusteringMethod::KMeans.as_str().to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanRequest {
    #[serde(default)]
    pub city_name: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default, alias = "dep_code")]
    pub department_code: Option<DepartmentInput>,
    #[serde(default = "default_cluster_nbr")]
    pub cluster_nbr: usize,
    #[serde(default = "default_method")]
    pub clustering_method: String,
    #[serde(default)]
    pub cluster_colors: Option<Vec<String>>,
    /// Overrides the configured similarity threshold for this request only.
    #[serde(default)]
    pub min_score: Option<f64>,
    #[serde(default)]
    pub seed: Option<u64>,
    /// `count` or `length`; only read by `balanced_kmeans`.
    #[serde(default)]
    pub balance_by: Option<String>,
}

impl Default for PlanRequest {
    fn default() -> Self {
        Self {
            city_name: None,
            postal_code: None,
            department_code: None,
            cluster_nbr: default_cluster_nbr(),
            clustering_method: default_method(),
            cluster_colors: None,
            min_score: None,
            seed: None,
            balance_by: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteStop {
    pub address_label: String,
    pub latitude: f64,
    pub longitude: f64,
    pub cluster_id: usize,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterStats {
    pub cluster_id: usize,
    pub color: String,
    pub address_count: usize,
    pub street_count: usize,
    pub centroid_latitude: f64,
    pub centroid_longitude: f64,
    /// Diagonal of the cluster bounding box, in metres.
    pub extent_m: f64,
    /// Estimated street length walked in this route, in metres. A street
    /// split across routes contributes in proportion to its addresses.
    pub total_length_m: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutePlan {
    pub municipality: Arc<Municipality>,
    pub method: ClusteringMethod,
    pub seed: u64,
    pub cluster_count: usize,
    pub palette: ColorPalette,
    pub stops: Vec<RouteStop>,
    pub stats: Vec<ClusterStats>,
    /// Better-scoring name matches outside the requested department.
    pub suggestions: Vec<Candidate>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PlanOutcome {
    Routes(RoutePlan),
    Ambiguous { candidates: Vec<Candidate> },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanFailure {
    pub kind: ErrorKind,
    pub reason: String,
    pub suggestion: String,
}

impl From<&TractError> for PlanFailure {
    fn from(err: &TractError) -> Self {
        Self {
            kind: err.kind(),
            reason: err.user_friendly_message(),
            suggestion: err.recovery_suggestion().to_string(),
        }
    }
}

/// Structured response handed to the rendering layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PlanResponse {
    Routes(RoutePlan),
    Ambiguous { candidates: Vec<Candidate> },
    Failed(PlanFailure),
}

impl From<Result<PlanOutcome>> for PlanResponse {
    fn from(result: Result<PlanOutcome>) -> Self {
        match result {
            Ok(PlanOutcome::Routes(plan)) => PlanResponse::Routes(plan),
            Ok(PlanOutcome::Ambiguous { candidates }) => PlanResponse::Ambiguous { candidates },
            Err(e) => PlanResponse::Failed(PlanFailure::from(&e)),
        }
    }
}

/// 命令列輸出的報告
#[derive(Debug, Clone, Serialize)]
pub struct PlanReport {
    pub generated_at: DateTime<Utc>,
    pub request: PlanRequest,
    pub response: PlanResponse,
}
