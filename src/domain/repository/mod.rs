pub mod quota_store;
pub mod sample_repository;

pub use quota_store::{QuotaStore, IN_FLIGHT_WINDOW_SECS};
pub use sample_repository::{SystemSampleRepository, SystemStatusReader};
