pub mod database;
pub mod in_memory_bus;
pub mod notifier;
pub mod rate_limit;

pub use database::sqlite::{
    SqliteDispatchRepository, SqliteProviderDirectory, SqliteRequestRepository,
};
pub use database::SqliteDatabase;
pub use in_memory_bus::{BusStats, InMemoryEventBus};
pub use notifier::LogNotifier;
pub use rate_limit::KeyedRateLimiter;
