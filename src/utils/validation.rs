use crate::utils::error::{Result, TractError};
use url::Url;

pub trait Validate {
    fn validate(&self) -> Result<()>;
}

/// 驗證並標準化省代碼：01-95、971-989、2A、2B
///
/// Accepts loose input (`"1"`, `" 2a "`, `"974"`) and returns the canonical
/// form (`"01"`, `"2A"`, `"974"`).
pub fn validate_department(raw: &str) -> Result<String> {
    let code = raw.trim().to_uppercase();

    if code == "2A" || code == "2B" {
        return Ok(code);
    }

    if !code.is_empty() && code.len() <= 3 && code.chars().all(|c| c.is_ascii_digit()) {
        // 長度已限制在三位數內，不會溢位
        let num: u32 = code.parse().unwrap_or(0);
        if (1..=95).contains(&num) {
            return Ok(format!("{:02}", num));
        }
        if (971..=989).contains(&num) {
            return Ok(num.to_string());
        }
    }

    Err(TractError::InvalidDepartment { value: raw.to_string() })
}

pub fn is_valid_department(raw: &str) -> bool {
    validate_department(raw).is_ok()
}

/// 郵遞區號：五位數字，CSV 若被當成整數讀入會掉前導零，這裡補回
pub fn normalize_postal_code(raw: &str) -> Option<String> {
    let code = raw.trim();
    if code.is_empty() || code.len() > 5 || !code.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(format!("{:0>5}", code))
}

pub fn validate_hex_color(value: &str) -> Result<()> {
    let hex = value.strip_prefix('#').unwrap_or("");
    if hex.len() == 6 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
        Ok(())
    } else {
        Err(TractError::InvalidColor {
            value: value.to_string(),
        })
    }
}

pub fn validate_url(field_name: &str, url_str: &str) -> Result<()> {
    if url_str.is_empty() {
        return Err(TractError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: url_str.to_string(),
            reason: "URL cannot be empty".to_string(),
        });
    }

    match Url::parse(url_str) {
        Ok(url) => match url.scheme() {
            "http" | "https" => Ok(()),
            scheme => Err(TractError::InvalidConfigValueError {
                field: field_name.to_string(),
                value: url_str.to_string(),
                reason: format!("Unsupported URL scheme: {}", scheme),
            }),
        },
        Err(e) => Err(TractError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: url_str.to_string(),
            reason: format!("Invalid URL format: {}", e),
        }),
    }
}

pub fn validate_path(field_name: &str, path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(TractError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: path.to_string(),
            reason: "Path cannot be empty".to_string(),
        });
    }

    if path.contains('\0') {
        return Err(TractError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: path.to_string(),
            reason: "Path contains null bytes".to_string(),
        });
    }

    Ok(())
}

pub fn validate_positive_number(field_name: &str, value: usize, min_value: usize) -> Result<()> {
    if value < min_value {
        return Err(TractError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: format!("Value must be at least {}", min_value),
        });
    }
    Ok(())
}

pub fn validate_range<T: PartialOrd + std::fmt::Display + Copy>(
    field_name: &str,
    value: T,
    min: T,
    max: T,
) -> Result<()> {
    use std::cmp::Ordering;
    // NaN 與任何值都無法比較，視為超出範圍
    let in_range = matches!(value.partial_cmp(&min), Some(Ordering::Greater | Ordering::Equal))
        && matches!(value.partial_cmp(&max), Some(Ordering::Less | Ordering::Equal));
    if !in_range {
        return Err(TractError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: format!("Value must be between {} and {}", min, max),
        });
    }
    Ok(())
}
