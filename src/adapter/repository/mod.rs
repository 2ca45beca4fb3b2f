pub mod quota_store_postgres;
pub mod system_sample_postgres;

pub use quota_store_postgres::QuotaStorePostgresRepository;
pub use system_sample_postgres::SystemSamplePostgresRepository;
