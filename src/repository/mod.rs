pub mod configuration_repository;
pub mod connection;
pub mod execution_repository;

pub use configuration_repository::ConfigurationRepository;
pub use connection::establish_connection;
pub use execution_repository::ExecutionRepository;

pub type DbPool = sqlx::SqlitePool;
