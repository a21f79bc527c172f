use crate::adapters::ban::DEFAULT_BAN_BASE_URL;
use crate::core::colors::{DEFAULT_SATURATION, DEFAULT_VALUE};
use crate::core::partition::{DEFAULT_BALANCE_TOLERANCE, DEFAULT_MAX_ITERATIONS, DEFAULT_SEED};
use crate::core::resolver::DEFAULT_MIN_SCORE;
use crate::domain::model::{BalanceBy, ClusteringMethod};
use crate::domain::ports::PlannerSettings;
use crate::utils::error::{Result, TractError};
use crate::utils::validation::{
    validate_path, validate_positive_number, validate_range, validate_url, Validate,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub data: DataConfig,
    pub resolver: ResolverConfig,
    pub clustering: ClusteringConfig,
    pub colors: ColorsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub municipalities_path: String,
    pub cache_dir: String,
    pub ban_base_url: String,
    pub request_timeout_seconds: u64,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            municipalities_path: "data/communes-france.csv".to_string(),
            cache_dir: "data/cache".to_string(),
            ban_base_url: DEFAULT_BAN_BASE_URL.to_string(),
            request_timeout_seconds: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub min_score: f64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            min_score: DEFAULT_MIN_SCORE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    pub default_method: ClusteringMethod,
    pub seed: u64,
    pub max_iterations: usize,
    pub balance_tolerance: f64,
    pub balance_by: BalanceBy,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            default_method: ClusteringMethod::KMeans,
            seed: DEFAULT_SEED,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            balance_tolerance: DEFAULT_BALANCE_TOLERANCE,
            balance_by: BalanceBy::Count,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorsConfig {
    pub saturation: f64,
    pub value: f64,
}

impl Default for ColorsConfig {
    fn default() -> Self {
        Self {
            saturation: DEFAULT_SATURATION,
            value: DEFAULT_VALUE,
        }
    }
}

impl TomlConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(TractError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| TractError::ConfigError {
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${BAN_BASE_URL})，未設定的保留原樣
    fn substitute_env_vars(content: &str) -> Result<String> {
        use regex::Regex;
        let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| TractError::ConfigError {
            message: format!("invalid substitution pattern: {}", e),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    pub fn validate_config(&self) -> Result<()> {
        validate_path("data.municipalities_path", &self.data.municipalities_path)?;
        validate_path("data.cache_dir", &self.data.cache_dir)?;
        validate_url("data.ban_base_url", &self.data.ban_base_url)?;
        validate_positive_number(
            "data.request_timeout_seconds",
            self.data.request_timeout_seconds as usize,
            1,
        )?;
        validate_range("resolver.min_score", self.resolver.min_score, 0.0, 100.0)?;
        validate_positive_number("clustering.max_iterations", self.clustering.max_iterations, 1)?;
        validate_range(
            "clustering.balance_tolerance",
            self.clustering.balance_tolerance,
            0.0,
            1.0,
        )?;
        validate_range("colors.saturation", self.colors.saturation, 0.0, 1.0)?;
        validate_range("colors.value", self.colors.value, 0.0, 1.0)?;
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.data.request_timeout_seconds)
    }
}

impl PlannerSettings for TomlConfig {
    fn min_score(&self) -> f64 {
        self.resolver.min_score
    }

    fn default_method(&self) -> ClusteringMethod {
        self.clustering.default_method
    }

    fn seed(&self) -> u64 {
        self.clustering.seed
    }

    fn max_iterations(&self) -> usize {
        self.clustering.max_iterations
    }

    fn balance_tolerance(&self) -> f64 {
        self.clustering.balance_tolerance
    }

    fn balance_by(&self) -> BalanceBy {
        self.clustering.balance_by
    }

    fn saturation(&self) -> f64 {
        self.colors.saturation
    }

    fn value(&self) -> f64 {
        self.colors.value
    }
}

impl Validate for TomlConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}
