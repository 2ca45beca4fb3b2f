pub mod begin_request;
pub mod block_user;
pub mod can_make_request;
pub mod get_system_status;
pub mod get_usage_statistics;
pub mod get_user_usage;
pub mod prune_usage;
pub mod record_usage;
pub mod unblock_user;

pub use begin_request::BeginRequestUseCase;
pub use block_user::BlockUserUseCase;
pub use can_make_request::CanMakeRequestUseCase;
pub use get_system_status::GetSystemStatusUseCase;
pub use get_usage_statistics::GetUsageStatisticsUseCase;
pub use get_user_usage::GetUserUsageUseCase;
pub use prune_usage::PruneUsageUseCase;
pub use record_usage::RecordUsageUseCase;
pub use unblock_user::UnblockUserUseCase;
