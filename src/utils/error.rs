use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TractError {
    #[error("Invalid query: {message}")]
    InvalidQuery { message: String },

    #[error("Invalid department code '{value}': must be 01-95, 971-989, 2A or 2B")]
    InvalidDepartment { value: String },

    #[error("City not found: '{query}'{}", format_suggestions(.suggestions))]
    CityNotFound {
        query: String,
        suggestions: Vec<String>,
    },

    #[error("Unsupported clustering method '{method}' (supported: {supported})")]
    UnsupportedMethod { method: String, supported: String },

    #[error("Palette size mismatch: {expected} clusters but {got} colors supplied")]
    PaletteSizeMismatch { expected: usize, got: usize },

    #[error("Invalid color '{value}': expected #RRGGBB")]
    InvalidColor { value: String },

    #[error("No address found for {city} in department {department}")]
    EmptyAddressSet { city: String, department: String },

    #[error("Address data unavailable for department {department}: {reason}")]
    DataUnavailable { department: String, reason: String },

    #[error("Data format error: {message}")]
    DataFormat { message: String },

    #[error("API request failed: {0}")]
    ApiError(#[from] reqwest::Error),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Worker task failed: {message}")]
    WorkerError { message: String },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Invalid value for '{field}': {value} ({reason})")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },
}

fn format_suggestions(suggestions: &[String]) -> String {
    if suggestions.is_empty() {
        String::new()
    } else {
        format!(" (did you mean: {})", suggestions.join(", "))
    }
}

/// 對外回報的錯誤種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidQuery,
    CityNotFound,
    UnsupportedMethod,
    PaletteSizeMismatch,
    DataUnavailable,
    DataFormat,
    EmptyAddressSet,
    Configuration,
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl TractError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TractError::InvalidQuery { .. }
            | TractError::InvalidDepartment { .. }
            | TractError::InvalidColor { .. } => ErrorKind::InvalidQuery,
            TractError::CityNotFound { .. } => ErrorKind::CityNotFound,
            TractError::UnsupportedMethod { .. } => ErrorKind::UnsupportedMethod,
            TractError::PaletteSizeMismatch { .. } => ErrorKind::PaletteSizeMismatch,
            TractError::EmptyAddressSet { .. } => ErrorKind::EmptyAddressSet,
            TractError::DataUnavailable { .. } | TractError::ApiError(_) => {
                ErrorKind::DataUnavailable
            }
            TractError::DataFormat { .. } | TractError::CsvError(_) => ErrorKind::DataFormat,
            TractError::ConfigError { .. }
            | TractError::InvalidConfigValueError { .. }
            | TractError::MissingConfigError { .. } => ErrorKind::Configuration,
            TractError::IoError(_)
            | TractError::SerializationError(_)
            | TractError::WorkerError { .. } => ErrorKind::Internal,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.kind() {
            ErrorKind::CityNotFound | ErrorKind::EmptyAddressSet => ErrorSeverity::Low,
            ErrorKind::DataUnavailable => ErrorSeverity::Medium,
            ErrorKind::InvalidQuery
            | ErrorKind::UnsupportedMethod
            | ErrorKind::PaletteSizeMismatch
            | ErrorKind::Configuration => ErrorSeverity::High,
            ErrorKind::DataFormat | ErrorKind::Internal => ErrorSeverity::Critical,
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            TractError::CityNotFound { query, suggestions } if !suggestions.is_empty() => {
                format!(
                    "No municipality matches '{}'. Closest names: {}",
                    query,
                    suggestions.join(", ")
                )
            }
            TractError::CityNotFound { query, .. } => {
                format!("No municipality matches '{}'", query)
            }
            TractError::DataUnavailable { department, .. } => format!(
                "The address base for department {} could not be obtained",
                department
            ),
            other => other.to_string(),
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.kind() {
            ErrorKind::InvalidQuery => "Provide a city name or a 5-digit postal code, and a valid department code",
            ErrorKind::CityNotFound => "Check the spelling, add the postal code, or lower --min-score",
            ErrorKind::UnsupportedMethod => "Use 'kmeans' or 'balanced_kmeans'",
            ErrorKind::PaletteSizeMismatch => "Supply exactly one color per cluster, or omit --colors",
            ErrorKind::DataUnavailable => "Check network access to the address base, then retry",
            ErrorKind::DataFormat => "Check the municipality dataset columns (nom_standard, code_postal, dep_code)",
            ErrorKind::EmptyAddressSet => "Check that the department code matches the city",
            ErrorKind::Configuration => "Fix the configuration file or command line flags",
            ErrorKind::Internal => "Retry; if the problem persists run with --verbose",
        }
    }
}

pub type Result<T> = std::result::Result<T, TractError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_city_not_found_lists_suggestions() {
        let err = TractError::CityNotFound {
            query: "Lyon".to_string(),
            suggestions: vec!["Lyon (69)".to_string()],
        };
        assert_eq!(err.kind(), ErrorKind::CityNotFound);
        assert!(err.to_string().contains("did you mean: Lyon (69)"));
    }

    #[test]
    fn test_department_error_is_invalid_query() {
        let err = TractError::InvalidDepartment {
            value: "96".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::InvalidQuery);
        assert_eq!(err.severity(), ErrorSeverity::High);
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::PaletteSizeMismatch).unwrap();
        assert_eq!(json, "\"palette_size_mismatch\"");
    }
}
