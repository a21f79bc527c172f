pub mod toml_config;

#[cfg(feature = "cli")]
use crate::domain::model::{DepartmentInput, PlanRequest};
#[cfg(feature = "cli")]
use crate::domain::ports::PlannerSettings;
#[cfg(feature = "cli")]
use crate::utils::error::{Result, TractError};
#[cfg(feature = "cli")]
use crate::utils::validation::{validate_range, Validate};
#[cfg(feature = "cli")]
use clap::Parser;
#[cfg(feature = "cli")]
use toml_config::TomlConfig;

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Parser)]
#[command(name = "collabtract")]
#[command(about = "Split a French municipality's addresses into colored canvassing routes")]
pub struct CliConfig {
    #[arg(long, help = "TOML configuration file")]
    pub config: Option<String>,

    #[arg(long, help = "Municipality name, fuzzy matched")]
    pub city: Option<String>,

    #[arg(long, help = "Postal code, narrows or replaces the name lookup")]
    pub postal_code: Option<String>,

    #[arg(long, help = "Department code (e.g. 69, 2A, 974)")]
    pub department: Option<String>,

    #[arg(long, default_value = "1")]
    pub clusters: usize,

    #[arg(long, help = "kmeans or balanced_kmeans [default: from config]")]
    pub method: Option<String>,

    #[arg(long, help = "balanced_kmeans only: count or length [default: from config]")]
    pub balance_by: Option<String>,

    #[arg(long, value_delimiter = ',', help = "One #RRGGBB color per route")]
    pub colors: Vec<String>,

    #[arg(long, help = "Minimum similarity score (0-100) for name matches")]
    pub min_score: Option<f64>,

    #[arg(long)]
    pub seed: Option<u64>,

    #[arg(long, help = "Write the JSON report here instead of stdout")]
    pub output: Option<String>,

    #[arg(long, help = "Municipality reference file [default: from config]")]
    pub municipalities: Option<String>,

    #[arg(long, help = "Address cache directory [default: from config]")]
    pub cache_dir: Option<String>,

    #[arg(long, help = "Emit logs as JSON")]
    pub json_logs: bool,

    #[arg(long, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, help = "Log memory and CPU usage per stage")]
    pub monitor: bool,
}

#[cfg(feature = "cli")]
impl CliConfig {
    /// 載入 TOML 配置（未指定則用預設值），並套用命令列覆寫
    pub fn load_settings(&self) -> Result<TomlConfig> {
        let mut settings = match &self.config {
            Some(path) => {
                tracing::info!("📁 Loading configuration from {}", path);
                TomlConfig::from_file(path)?
            }
            None => TomlConfig::default(),
        };

        if let Some(path) = &self.municipalities {
            settings.data.municipalities_path = path.clone();
        }
        if let Some(dir) = &self.cache_dir {
            settings.data.cache_dir = dir.clone();
        }
        if let Some(seed) = self.seed {
            settings.clustering.seed = seed;
        }

        settings.validate()?;
        Ok(settings)
    }

    /// 由命令列參數組成一次規劃請求
    pub fn to_request(&self, settings: &TomlConfig) -> PlanRequest {
        PlanRequest {
            city_name: self.city.clone(),
            postal_code: self.postal_code.clone(),
            department_code: self.department.as_deref().map(DepartmentInput::from),
            cluster_nbr: self.clusters,
            clustering_method: self
                .method
                .clone()
                .unwrap_or_else(|| settings.default_method().as_str().to_string()),
            cluster_colors: (!self.colors.is_empty()).then(|| self.colors.clone()),
            min_score: self.min_score,
            seed: self.seed,
            balance_by: self.balance_by.clone(),
        }
    }
}

#[cfg(feature = "cli")]
impl Validate for CliConfig {
    fn validate(&self) -> Result<()> {
        if self.city.is_none() && self.postal_code.is_none() {
            return Err(TractError::MissingConfigError {
                field: "city or postal_code".to_string(),
            });
        }
        if self.clusters == 0 {
            return Err(TractError::InvalidConfigValueError {
                field: "clusters".to_string(),
                value: "0".to_string(),
                reason: "At least one route is required".to_string(),
            });
        }
        if let Some(score) = self.min_score {
            validate_range("min_score", score, 0.0, 100.0)?;
        }
        Ok(())
    }
}
