//! PostgreSQL backend for the [`dcb`] event store.
//!
//! [EventStore] implements both [`dcb::Streamer`] and [`dcb::Appender`]:
//!
//! ```no_run
//! # use envconfig::Envconfig;
//! # use dcb_postgres::{Config, EventStore};
//! #
//! # async fn dox() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::init_from_env()?;
//!
//! // Builds the connection pool and applies the embedded migrations.
//! let store = EventStore::from_config(&config).await?;
//! # Ok(())
//! # }
//! ```
//!
//! The schema requires PostgreSQL 13 or later.

#![deny(unsafe_code, unused_qualifications, trivial_casts)]

pub mod config;
mod sql;
pub mod store;

pub use crate::config::Config;
pub use crate::store::{ConnectionPool, Error, EventStore};

mod embedded {
    refinery::embed_migrations!("migrations");
}
