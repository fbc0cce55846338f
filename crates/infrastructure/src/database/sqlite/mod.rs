pub mod sqlite_dispatch_repository;
pub mod sqlite_provider_directory;
pub mod sqlite_request_repository;

pub use sqlite_dispatch_repository::SqliteDispatchRepository;
pub use sqlite_provider_directory::SqliteProviderDirectory;
pub use sqlite_request_repository::SqliteRequestRepository;
