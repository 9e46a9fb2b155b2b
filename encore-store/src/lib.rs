pub mod app_config;
pub mod memory;
pub mod catalog;
pub mod database;
pub mod pg_repo;
pub mod redis_repo;

pub use memory::MemoryStore;
pub use catalog::StaticPriceCatalog;
pub use database::DbClient;
pub use pg_repo::{PgPriceCatalog, PgStore};
pub use redis_repo::RedisStore;
