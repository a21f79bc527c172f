pub mod colors;
pub mod municipality_index;
pub mod normalize;
pub mod partition;
pub mod planner;
pub mod resolver;
pub mod streets;

pub use crate::domain::model::{Address, Candidate, Municipality, PlanRequest, PlanResponse};
pub use crate::domain::ports::{AddressRepository, PlannerSettings, Storage};
pub use crate::utils::error::Result;
