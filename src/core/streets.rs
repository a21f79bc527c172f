//! Street-level aggregation used by balanced routing.
//!
//! A canvasser walks a street from end to end, so `balanced_kmeans` moves
//! whole streets between routes. Each street carries its address count, the
//! mean position of its addresses and an estimated length.

use crate::domain::model::{Address, BalanceBy};
use crate::utils::geo::haversine_m;
use std::collections::HashMap;

/// Outlier fence, in interquartile ranges beyond Q1 / Q3.
const OUTLIER_FACTOR: f64 = 5.0;
/// Median gap between consecutive house numbers below which numbering is
/// sequential (1, 2, 3...) rather than metric.
const SEQUENTIAL_GAP: f64 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreetKind {
    /// 連續門牌，長度取地址範圍的對角線
    Center,
    /// 公尺制門牌，最大號碼即為距起點的公尺數
    Side,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Street {
    pub name: String,
    /// Positions of the street's addresses in the input slice.
    pub members: Vec<usize>,
    pub latitude: f64,
    pub longitude: f64,
    pub length_m: f64,
    pub kind: StreetKind,
}

impl Street {
    pub fn address_count(&self) -> usize {
        self.members.len()
    }

    /// Load this street adds to a route. Zero-length streets still weigh 1.
    pub fn weight(&self, balance_by: BalanceBy) -> f64 {
        match balance_by {
            BalanceBy::Count => self.members.len() as f64,
            BalanceBy::Length => self.length_m.max(1.0),
        }
    }
}

/// Groups addresses by street name, in order of first appearance.
///
/// An address without a street name forms a street of its own.
pub fn aggregate_streets(addresses: &[Address]) -> Vec<Street> {
    let mut groups: Vec<Vec<usize>> = Vec::new();
    let mut by_name: HashMap<&str, usize> = HashMap::new();

    for (i, address) in addresses.iter().enumerate() {
        let name = address.street_name.as_str();
        if name.is_empty() {
            groups.push(vec![i]);
            continue;
        }
        match by_name.get(name) {
            Some(&g) => groups[g].push(i),
            None => {
                by_name.insert(name, groups.len());
                groups.push(vec![i]);
            }
        }
    }

    groups
        .into_iter()
        .map(|members| build_street(addresses, members))
        .collect()
}

fn build_street(addresses: &[Address], members: Vec<usize>) -> Street {
    let name = addresses[members[0]].street_name.clone();
    let n = members.len() as f64;
    let latitude = members.iter().map(|&i| addresses[i].latitude).sum::<f64>() / n;
    let longitude = members.iter().map(|&i| addresses[i].longitude).sum::<f64>() / n;
    let (kind, length_m) = estimate_length(&name, addresses, &members);

    Street {
        name,
        members,
        latitude,
        longitude,
        length_m,
        kind,
    }
}

fn estimate_length(name: &str, addresses: &[Address], members: &[usize]) -> (StreetKind, f64) {
    let mut numbers: Vec<f64> = members
        .iter()
        .filter_map(|&i| addresses[i].house_number)
        .map(f64::from)
        .collect();
    numbers.sort_by(f64::total_cmp);

    let outlier = single_outlier(&numbers);
    if let Some(value) = outlier {
        numbers.retain(|&x| x != value);
    }

    let gaps: Vec<f64> = numbers.windows(2).map(|w| w[1] - w[0]).collect();
    match (median(&gaps), numbers.last()) {
        (Some(gap), _) if gap < SEQUENTIAL_GAP => {
            if let Some(value) = outlier {
                tracing::warn!("Outlier house number {} ignored on {}", value, name);
            }
            (StreetKind::Center, extent_m(addresses, members))
        }
        (_, Some(&max)) => (StreetKind::Side, max),
        (_, None) => (StreetKind::Center, extent_m(addresses, members)),
    }
}

fn extent_m(addresses: &[Address], members: &[usize]) -> f64 {
    let (mut min_lat, mut max_lat) = (f64::INFINITY, f64::NEG_INFINITY);
    let (mut min_lon, mut max_lon) = (f64::INFINITY, f64::NEG_INFINITY);
    for &i in members {
        min_lat = min_lat.min(addresses[i].latitude);
        max_lat = max_lat.max(addresses[i].latitude);
        min_lon = min_lon.min(addresses[i].longitude);
        max_lon = max_lon.max(addresses[i].longitude);
    }
    haversine_m(min_lat, min_lon, max_lat, max_lon)
}

/// Linear-interpolated quantile of sorted, non-empty values.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let h = (sorted.len() - 1) as f64 * q;
    let lo = h.floor() as usize;
    let hi = (lo + 1).min(sorted.len() - 1);
    sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
}

/// The value outside the IQR fence, when exactly one value is.
fn single_outlier(sorted: &[f64]) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let q1 = quantile(sorted, 0.25);
    let q3 = quantile(sorted, 0.75);
    let iqr = q3 - q1;
    let (lower, upper) = (q1 - OUTLIER_FACTOR * iqr, q3 + OUTLIER_FACTOR * iqr);

    let mut outside = sorted.iter().filter(|&&x| x < lower || x > upper);
    match (outside.next(), outside.next()) {
        (Some(&x), None) => Some(x),
        _ => None,
    }
}

fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    Some(if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    })
}
