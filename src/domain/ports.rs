use crate::domain::model::{AddressRecord, BalanceBy, ClusteringMethod};
use crate::utils::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Raw file cache used by address repositories.
pub trait Storage: Send + Sync {
    fn exists(&self, path: &str) -> impl std::future::Future<Output = bool> + Send;
    fn read_file(&self, path: &str) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;
    fn write_file(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl std::future::Future<Output = Result<()>> + Send;
    /// Removing a missing file is not an error.
    fn remove_file(&self, path: &str) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// Source of street addresses, one department at a time.
///
/// Implementations must fail with `TractError::DataUnavailable` when the
/// department dataset cannot be obtained.
#[async_trait]
pub trait AddressRepository: Send + Sync {
    async fn get_addresses(&self, department_code: &str) -> Result<Arc<Vec<AddressRecord>>>;
}

pub trait PlannerSettings: Send + Sync {
    fn min_score(&self) -> f64;
    fn default_method(&self) -> ClusteringMethod;
    fn seed(&self) -> u64;
    fn max_iterations(&self) -> usize;
    fn balance_tolerance(&self) -> f64;
    fn balance_by(&self) -> BalanceBy;
    fn saturation(&self) -> f64;
    fn value(&self) -> f64;
}
