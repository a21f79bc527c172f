//! Spatial partitioning of addresses into route groups.
//!
//! Points are `(latitude, longitude)` pairs compared with plain Euclidean
//! distance in degree space, which is accurate enough inside one
//! municipality. Every run is driven by an explicit seed so the same input
//! always yields the same assignment.
//!
//! `kmeans` clusters addresses directly. `balanced_kmeans` clusters whole
//! streets, weighted by address count or estimated length, so a street is
//! never split across routes.

use crate::core::streets::{aggregate_streets, Street};
use crate::domain::model::{Address, BalanceBy, ClusterAssignment, ClusteringMethod};
use crate::utils::error::{Result, TractError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub const DEFAULT_SEED: u64 = 42;
pub const DEFAULT_MAX_ITERATIONS: usize = 300;
pub const DEFAULT_BALANCE_TOLERANCE: f64 = 0.1;

const LOAD_EPSILON: f64 = 1e-9;

type Point = [f64; 2];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PartitionOptions {
    pub seed: u64,
    pub max_iterations: usize,
    /// Allowed relative deviation from the ideal load for `balanced_kmeans`.
    pub balance_tolerance: f64,
    pub balance_by: BalanceBy,
}

impl Default for PartitionOptions {
    fn default() -> Self {
        Self {
            seed: DEFAULT_SEED,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            balance_tolerance: DEFAULT_BALANCE_TOLERANCE,
            balance_by: BalanceBy::Count,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    pub assignment: ClusterAssignment,
    pub centroids: Vec<[f64; 2]>,
    pub iterations: usize,
}

impl Partition {
    fn empty() -> Self {
        Self {
            assignment: ClusterAssignment::empty(),
            centroids: Vec::new(),
            iterations: 0,
        }
    }

    pub fn cluster_count(&self) -> usize {
        self.assignment.cluster_count()
    }
}

pub fn partition(
    addresses: &[Address],
    cluster_nbr: usize,
    method: ClusteringMethod,
    options: &PartitionOptions,
) -> Result<Partition> {
    let points: Vec<Point> = addresses.iter().map(|a| [a.latitude, a.longitude]).collect();
    match method {
        ClusteringMethod::KMeans => partition_points(&points, cluster_nbr, method, options),
        ClusteringMethod::BalancedKMeans => {
            check_input(&points, cluster_nbr)?;
            let streets = aggregate_streets(addresses);
            partition_streets(&points, &streets, cluster_nbr, options)
        }
    }
}

/// Partitions bare points, each weighing one.
pub fn partition_points(
    points: &[Point],
    cluster_nbr: usize,
    method: ClusteringMethod,
    options: &PartitionOptions,
) -> Result<Partition> {
    let weights = vec![1.0; points.len()];
    partition_weighted(points, &weights, cluster_nbr, method, options)
}

fn check_input(points: &[Point], cluster_nbr: usize) -> Result<()> {
    if cluster_nbr == 0 {
        return Err(TractError::InvalidQuery {
            message: "cluster_nbr must be a positive integer".to_string(),
        });
    }
    if let Some(i) = points.iter().position(|p| !p[0].is_finite() || !p[1].is_finite()) {
        return Err(TractError::DataFormat {
            message: format!("address #{} has non-finite coordinates", i),
        });
    }
    Ok(())
}

fn partition_weighted(
    points: &[Point],
    weights: &[f64],
    cluster_nbr: usize,
    method: ClusteringMethod,
    options: &PartitionOptions,
) -> Result<Partition> {
    check_input(points, cluster_nbr)?;
    if points.is_empty() {
        return Ok(Partition::empty());
    }

    // 群數不可超過點數，先夾住再跑演算法
    let k = cluster_nbr.min(points.len());
    if k < cluster_nbr {
        tracing::debug!("Clamping cluster count from {} to {}", cluster_nbr, k);
    }

    let mut rng = StdRng::seed_from_u64(options.seed);
    let centroids = kmeans_plus_plus_init(points, k, &mut rng);
    let max_iterations = options.max_iterations.max(1);

    let (labels, centroids, iterations) = match method {
        ClusteringMethod::KMeans => lloyd(points, weights, centroids, max_iterations),
        ClusteringMethod::BalancedKMeans => {
            let (_, seeded, _) = lloyd(points, weights, centroids, max_iterations);
            balanced(points, weights, seeded, max_iterations, options.balance_tolerance)
        }
    };

    let (labels, centroids) = relabel_by_first_appearance(labels, centroids);
    tracing::debug!(
        "{} finished after {} iteration(s) with {} clusters",
        method,
        iterations,
        k
    );

    Ok(Partition {
        assignment: ClusterAssignment::from_labels(labels, k),
        centroids,
        iterations,
    })
}

/// Balances whole streets, then hands every address its street's route.
fn partition_streets(
    points: &[Point],
    streets: &[Street],
    cluster_nbr: usize,
    options: &PartitionOptions,
) -> Result<Partition> {
    if streets.is_empty() {
        return Ok(Partition::empty());
    }
    let street_points: Vec<Point> = streets.iter().map(|s| [s.latitude, s.longitude]).collect();
    let weights: Vec<f64> = streets.iter().map(|s| s.weight(options.balance_by)).collect();
    tracing::debug!(
        "Balancing {} streets by {} (total load {:.0})",
        streets.len(),
        options.balance_by,
        weights.iter().sum::<f64>()
    );

    let by_street = partition_weighted(
        &street_points,
        &weights,
        cluster_nbr,
        ClusteringMethod::BalancedKMeans,
        options,
    )?;
    let k = by_street.cluster_count();

    let mut labels = vec![0; points.len()];
    for (street, &label) in streets.iter().zip(by_street.assignment.labels()) {
        for &i in &street.members {
            labels[i] = label;
        }
    }
    let mut centroids = vec![[0.0, 0.0]; k];
    update_centroids(points, &vec![1.0; points.len()], &labels, &mut centroids);
    let (labels, centroids) = relabel_by_first_appearance(labels, centroids);

    Ok(Partition {
        assignment: ClusterAssignment::from_labels(labels, k),
        centroids,
        iterations: by_street.iterations,
    })
}

fn squared_distance(a: &Point, b: &Point) -> f64 {
    (a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)
}

fn nearest(point: &Point, centroids: &[Point]) -> usize {
    let mut best = 0;
    let mut best_dist = f64::INFINITY;
    for (j, c) in centroids.iter().enumerate() {
        let dist = squared_distance(point, c);
        if dist < best_dist {
            best_dist = dist;
            best = j;
        }
    }
    best
}

/// k-means++ seeding: each new centroid is drawn with probability
/// proportional to its squared distance to the closest chosen one.
fn kmeans_plus_plus_init(points: &[Point], k: usize, rng: &mut StdRng) -> Vec<Point> {
    let n = points.len();
    let mut chosen = Vec::with_capacity(k);
    chosen.push(rng.random_range(0..n));

    let mut min_distances = vec![f64::INFINITY; n];
    while chosen.len() < k {
        let last = points[chosen[chosen.len() - 1]];
        for (i, p) in points.iter().enumerate() {
            min_distances[i] = min_distances[i].min(squared_distance(p, &last));
        }

        let total: f64 = min_distances.iter().sum();
        let next = if total > 0.0 {
            let mut target = rng.random::<f64>() * total;
            let mut pick = None;
            for (i, &d) in min_distances.iter().enumerate() {
                if d <= 0.0 {
                    continue;
                }
                pick = Some(i);
                if target < d {
                    break;
                }
                target -= d;
            }
            pick
        } else {
            None
        };

        // 所有點都與現有中心重合時，依序取尚未選過的點
        let next = next.unwrap_or_else(|| (0..n).find(|i| !chosen.contains(i)).unwrap_or(0));
        chosen.push(next);
    }

    chosen.into_iter().map(|i| points[i]).collect()
}

fn update_centroids(points: &[Point], weights: &[f64], labels: &[usize], centroids: &mut [Point]) {
    let k = centroids.len();
    let mut sums = vec![[0.0, 0.0]; k];
    let mut totals = vec![0.0; k];
    for ((p, &w), &label) in points.iter().zip(weights).zip(labels) {
        sums[label][0] += p[0] * w;
        sums[label][1] += p[1] * w;
        totals[label] += w;
    }
    for j in 0..k {
        if totals[j] > 0.0 {
            centroids[j] = [sums[j][0] / totals[j], sums[j][1] / totals[j]];
        }
    }
}

/// Moves into each empty cluster the point lying farthest from its own
/// centroid, taken from a cluster that keeps at least one member.
fn fill_empty_clusters(points: &[Point], labels: &mut [usize], centroids: &mut [Point]) {
    let k = centroids.len();
    let mut counts = vec![0usize; k];
    for &label in labels.iter() {
        counts[label] += 1;
    }

    for empty in 0..k {
        if counts[empty] > 0 {
            continue;
        }
        let donor = labels
            .iter()
            .enumerate()
            .filter(|(_, &label)| counts[label] > 1)
            .map(|(i, &label)| (i, squared_distance(&points[i], &centroids[label])))
            .fold(None::<(usize, f64)>, |best, (i, d)| match best {
                Some((_, best_d)) if best_d >= d => best,
                _ => Some((i, d)),
            });

        if let Some((i, _)) = donor {
            counts[labels[i]] -= 1;
            labels[i] = empty;
            counts[empty] += 1;
            centroids[empty] = points[i];
        }
    }
}

fn lloyd(
    points: &[Point],
    weights: &[f64],
    mut centroids: Vec<Point>,
    max_iterations: usize,
) -> (Vec<usize>, Vec<Point>, usize) {
    let mut labels: Vec<usize> = points.iter().map(|p| nearest(p, &centroids)).collect();
    fill_empty_clusters(points, &mut labels, &mut centroids);
    let mut iterations = 1;

    while iterations < max_iterations {
        update_centroids(points, weights, &labels, &mut centroids);

        let mut next: Vec<usize> = points.iter().map(|p| nearest(p, &centroids)).collect();
        fill_empty_clusters(points, &mut next, &mut centroids);
        iterations += 1;

        if next == labels {
            break;
        }
        labels = next;
    }
    update_centroids(points, weights, &labels, &mut centroids);

    (labels, centroids, iterations)
}

/// Load bounds `(min, max)` per cluster for a total load split `k` ways.
pub fn load_bounds(total: f64, k: usize, tolerance: f64) -> (f64, f64) {
    let ideal = total / k as f64;
    let tolerance = tolerance.clamp(0.0, 1.0);
    (ideal * (1.0 - tolerance), ideal * (1.0 + tolerance))
}

/// Capacity-constrained assignment.
///
/// Points whose nearest cluster beats the runner-up by the widest margin
/// choose first, each taking its closest cluster with room left. A point
/// that fits nowhere joins the least-loaded cluster, nearest first on ties. Clusters still under
/// `min` then pull the cheapest points from clusters that can spare them.
fn balanced_assign(
    points: &[Point],
    weights: &[f64],
    centroids: &[Point],
    min: f64,
    max: f64,
) -> Vec<usize> {
    let k = centroids.len();
    let preferences: Vec<Vec<(f64, usize)>> = points
        .iter()
        .map(|p| {
            let mut order: Vec<(f64, usize)> = centroids
                .iter()
                .enumerate()
                .map(|(j, c)| (squared_distance(p, c), j))
                .collect();
            order.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
            order
        })
        .collect();
    let regrets: Vec<f64> = preferences
        .iter()
        .map(|order| match order.as_slice() {
            [best, second, ..] => second.0 - best.0,
            _ => 0.0,
        })
        .collect();

    let mut order: Vec<usize> = (0..points.len()).collect();
    order.sort_by(|&a, &b| regrets[b].total_cmp(&regrets[a]).then(a.cmp(&b)));

    let mut labels = vec![0; points.len()];
    let mut loads = vec![0.0; k];
    for &i in &order {
        let w = weights[i];
        let pick = preferences[i]
            .iter()
            .map(|&(_, j)| j)
            .find(|&j| loads[j] + w <= max + LOAD_EPSILON)
            .unwrap_or_else(|| least_loaded(&preferences[i], &loads));
        labels[i] = pick;
        loads[pick] += w;
    }

    for target in 0..k {
        while loads[target] + LOAD_EPSILON < min {
            let candidate = labels
                .iter()
                .enumerate()
                .filter(|&(i, &label)| {
                    label != target
                        && loads[label] - weights[i] + LOAD_EPSILON >= min
                        && loads[target] + weights[i] <= max + LOAD_EPSILON
                })
                .map(|(i, &label)| {
                    let cost = squared_distance(&points[i], &centroids[target])
                        - squared_distance(&points[i], &centroids[label]);
                    (i, cost)
                })
                .fold(None::<(usize, f64)>, |best, (i, cost)| match best {
                    Some((_, best_cost)) if best_cost <= cost => best,
                    _ => Some((i, cost)),
                });
            let Some((i, _)) = candidate else { break };
            loads[labels[i]] -= weights[i];
            labels[i] = target;
            loads[target] += weights[i];
        }
    }

    labels
}

fn least_loaded(preferences: &[(f64, usize)], loads: &[f64]) -> usize {
    preferences
        .iter()
        .map(|&(_, j)| j)
        .min_by(|&a, &b| loads[a].total_cmp(&loads[b]))
        .unwrap_or(0)
}

fn balanced(
    points: &[Point],
    weights: &[f64],
    mut centroids: Vec<Point>,
    max_iterations: usize,
    tolerance: f64,
) -> (Vec<usize>, Vec<Point>, usize) {
    let total: f64 = weights.iter().sum();
    let (min, max) = load_bounds(total, centroids.len(), tolerance);
    tracing::debug!("Balanced cluster loads between {:.1} and {:.1}", min, max);

    let mut labels = balanced_assign(points, weights, &centroids, min, max);
    fill_empty_clusters(points, &mut labels, &mut centroids);
    let mut iterations = 1;
    while iterations < max_iterations {
        update_centroids(points, weights, &labels, &mut centroids);
        let mut next = balanced_assign(points, weights, &centroids, min, max);
        fill_empty_clusters(points, &mut next, &mut centroids);
        iterations += 1;
        if next == labels {
            break;
        }
        labels = next;
    }
    update_centroids(points, weights, &labels, &mut centroids);

    (labels, centroids, iterations)
}

/// Cluster ids follow the order in which clusters first appear in the input.
fn relabel_by_first_appearance(labels: Vec<usize>, centroids: Vec<Point>) -> (Vec<usize>, Vec<Point>) {
    let mut mapping = vec![usize::MAX; centroids.len()];
    let mut next = 0;
    for &label in &labels {
        if mapping[label] == usize::MAX {
            mapping[label] = next;
            next += 1;
        }
    }

    let mut ordered = vec![[0.0, 0.0]; next];
    for (old, &new) in mapping.iter().enumerate() {
        if new != usize::MAX {
            ordered[new] = centroids[old];
        }
    }
    (labels.into_iter().map(|l| mapping[l]).collect(), ordered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::Municipality;
    use std::sync::Arc;

    fn three_blobs() -> Vec<Point> {
        vec![
            [45.750, 4.850],
            [45.760, 4.830],
            [45.751, 4.851],
            [45.752, 4.849],
            [45.761, 4.831],
            [45.770, 4.870],
            [45.771, 4.871],
            [45.759, 4.829],
            [45.769, 4.869],
        ]
    }

    fn assert_contiguous(partition: &Partition, n: usize) {
        let assignment = &partition.assignment;
        assert_eq!(assignment.len(), n);
        let sizes = assignment.sizes();
        assert!(sizes.iter().all(|&s| s > 0), "empty cluster in {:?}", sizes);
        assert_eq!(sizes.iter().sum::<usize>(), n);
    }

    #[test]
    fn test_three_blobs_are_separated() {
        let points = three_blobs();
        let partition =
            partition_points(&points, 3, ClusteringMethod::KMeans, &PartitionOptions::default())
                .unwrap();
        assert_contiguous(&partition, points.len());
        assert_eq!(partition.assignment.sizes(), vec![3, 3, 3]);

        let labels = partition.assignment.labels();
        assert_eq!(labels[0], labels[2]);
        assert_eq!(labels[0], labels[3]);
        assert_eq!(labels[1], labels[4]);
        assert_eq!(labels[1], labels[7]);
        assert_eq!(labels[5], labels[6]);
        assert_eq!(labels[5], labels[8]);
        // 依出現順序編號
        assert_eq!(labels[0], 0);
        assert_eq!(labels[1], 1);
        assert_eq!(labels[5], 2);
    }

    #[test]
    fn test_same_seed_is_deterministic() {
        let points: Vec<Point> = (0..200)
            .map(|i| {
                let t = i as f64;
                [45.7 + (t * 0.37).sin() * 0.05, 4.8 + (t * 0.91).cos() * 0.05]
            })
            .collect();
        let options = PartitionOptions {
            seed: 7,
            ..PartitionOptions::default()
        };

        let first = partition_points(&points, 6, ClusteringMethod::KMeans, &options).unwrap();
        let second = partition_points(&points, 6, ClusteringMethod::KMeans, &options).unwrap();
        assert_eq!(first.assignment, second.assignment);
        assert_eq!(first.centroids, second.centroids);
        assert_contiguous(&first, points.len());
        assert_eq!(first.cluster_count(), 6);
    }

    #[test]
    fn test_cluster_count_clamped_to_point_count() {
        let points = vec![[45.0, 4.0], [45.1, 4.1], [45.2, 4.2]];
        let partition =
            partition_points(&points, 10, ClusteringMethod::KMeans, &PartitionOptions::default())
                .unwrap();
        assert_eq!(partition.cluster_count(), 3);
        assert_eq!(partition.assignment.sizes(), vec![1, 1, 1]);
    }

    #[test]
    fn test_empty_input_is_empty_assignment() {
        let partition =
            partition_points(&[], 4, ClusteringMethod::KMeans, &PartitionOptions::default())
                .unwrap();
        assert!(partition.assignment.is_empty());
        assert_eq!(partition.cluster_count(), 0);
    }

    #[test]
    fn test_zero_clusters_rejected() {
        let err = partition_points(
            &[[45.0, 4.0]],
            0,
            ClusteringMethod::KMeans,
            &PartitionOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, TractError::InvalidQuery { .. }));
    }

    #[test]
    fn test_duplicate_points_still_fill_every_cluster() {
        let points = vec![[45.0, 4.0]; 5];
        let partition =
            partition_points(&points, 3, ClusteringMethod::KMeans, &PartitionOptions::default())
                .unwrap();
        assert_contiguous(&partition, 5);
        assert_eq!(partition.cluster_count(), 3);
    }

    #[test]
    fn test_balanced_respects_bounds() {
        // 一大群加一小群，普通 k-means 會不平均
        let mut points: Vec<Point> = (0..18)
            .map(|i| [45.75 + (i as f64) * 0.0001, 4.85 + (i as f64 % 3.0) * 0.0001])
            .collect();
        points.extend((0..2).map(|i| [45.9 + (i as f64) * 0.0001, 4.95]));

        let partition = partition_points(
            &points,
            2,
            ClusteringMethod::BalancedKMeans,
            &PartitionOptions::default(),
        )
        .unwrap();
        let (min, max) = load_bounds(20.0, 2, DEFAULT_BALANCE_TOLERANCE);
        for size in partition.assignment.sizes() {
            let size = size as f64;
            assert!(size >= min && size <= max, "size {} outside {}..={}", size, min, max);
        }
    }

    #[test]
    fn test_load_bounds() {
        let (min, max) = load_bounds(100.0, 4, 0.2);
        assert!((min - 20.0).abs() < 1e-9);
        assert!((max - 30.0).abs() < 1e-9);
        assert_eq!(load_bounds(10.0, 2, 3.0), (0.0, 10.0));
        assert_eq!(load_bounds(9.0, 3, 0.0), (3.0, 3.0));
    }

    fn address(street: &str, number: u32, lat: f64, lon: f64) -> Address {
        Address {
            street_label: format!("{} {}", number, street),
            street_name: street.to_string(),
            house_number: Some(number),
            latitude: lat,
            longitude: lon,
            municipality: Arc::new(Municipality::new("Vienne", "38200", "38")),
        }
    }

    /// 四條門牌連續的短街，加上遠處一條門牌按公尺編號的長路
    fn village() -> Vec<Address> {
        let mut addresses = Vec::new();
        for (s, street) in ["Rue A", "Rue B", "Rue C", "Rue D"].iter().enumerate() {
            for n in 1..=5 {
                addresses.push(address(
                    street,
                    n,
                    45.5200 + n as f64 * 0.0001,
                    4.8700 + s as f64 * 0.0005,
                ));
            }
        }
        addresses.push(address("Route de Lyon", 100, 45.6200, 4.9700));
        addresses.push(address("Route de Lyon", 2000, 45.6210, 4.9710));
        addresses
    }

    fn assert_streets_whole(addresses: &[Address], partition: &Partition) {
        let labels = partition.assignment.labels();
        for street in aggregate_streets(addresses) {
            let first = labels[street.members[0]];
            assert!(
                street.members.iter().all(|&i| labels[i] == first),
                "{} split across routes",
                street.name
            );
        }
    }

    #[test]
    fn test_balanced_never_splits_a_street() {
        let addresses = village();
        let partition = partition(
            &addresses,
            2,
            ClusteringMethod::BalancedKMeans,
            &PartitionOptions::default(),
        )
        .unwrap();

        assert_streets_whole(&addresses, &partition);
        assert_eq!(partition.cluster_count(), 2);
        let mut sizes = partition.assignment.sizes();
        sizes.sort_unstable();
        // 22 個地址，每群 9.9 到 12.1 個
        assert_eq!(sizes, vec![10, 12]);
    }

    #[test]
    fn test_balance_by_length_isolates_long_road() {
        let addresses = village();
        let options = PartitionOptions {
            balance_by: BalanceBy::Length,
            ..PartitionOptions::default()
        };
        let partition =
            partition(&addresses, 2, ClusteringMethod::BalancedKMeans, &options).unwrap();

        assert_streets_whole(&addresses, &partition);
        let road = partition.assignment.labels()[20];
        assert_eq!(partition.assignment.members(road), vec![20, 21]);
    }

    #[test]
    fn test_balanced_clamps_to_street_count() {
        let addresses: Vec<Address> = (1..=4)
            .map(|n| address("Rue Unique", n, 45.52 + n as f64 * 0.0001, 4.87))
            .collect();
        let partition = partition(
            &addresses,
            3,
            ClusteringMethod::BalancedKMeans,
            &PartitionOptions::default(),
        )
        .unwrap();
        assert_eq!(partition.cluster_count(), 1);
        assert_eq!(partition.assignment.sizes(), vec![4]);
        assert_eq!(partition.centroids.len(), 1);
    }

    #[test]
    fn test_balanced_rejects_non_finite_coordinates() {
        let mut addresses = village();
        addresses[3].latitude = f64::NAN;
        let err = partition(
            &addresses,
            2,
            ClusteringMethod::BalancedKMeans,
            &PartitionOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, TractError::DataFormat { .. }));
    }
}
