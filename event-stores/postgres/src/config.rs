//! Environment configuration for the PostgreSQL [EventStore][crate::EventStore].

use envconfig::Envconfig;

/// Connection and tuning parameters, loaded with [`Envconfig::init_from_env`].
#[derive(Debug, Clone, Envconfig)]
pub struct Config {
    #[envconfig(from = "DB_HOST", default = "localhost")]
    pub db_host: String,

    #[envconfig(from = "DB_PORT", default = "5432")]
    pub db_port: u16,

    #[envconfig(from = "DB_USERNAME", default = "postgres")]
    pub db_username: String,

    #[envconfig(from = "DB_PASSWORD", default = "password")]
    pub db_password: String,

    #[envconfig(from = "DB_DATABASE", default = "postgres")]
    pub db_database: String,

    /// Maximum number of pooled connections.
    #[envconfig(from = "DB_POOL_MAX_SIZE", default = "10")]
    pub db_pool_max_size: u32,

    /// Number of rows fetched per round-trip when streaming events.
    #[envconfig(from = "DB_FETCH_SIZE", default = "500")]
    pub db_fetch_size: i32,

    /// Key of the transaction-level advisory lock taken by every append.
    #[envconfig(from = "DB_APPEND_LOCK_KEY", default = "4242")]
    pub db_append_lock_key: i64,
}

impl Config {
    pub fn postgres_dsn(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode=disable",
            self.db_username, self.db_password, self.db_host, self.db_port, self.db_database
        )
    }
}
