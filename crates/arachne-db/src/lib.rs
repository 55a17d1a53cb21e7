pub mod broker;
pub mod config;
pub mod database;

pub use broker::PgBroker;
pub use config::DatabaseConfig;
pub use database::Database;
