use dcb_postgres::EventStore;
use rand::Rng;
use testcontainers_modules::postgres::Postgres;
use testcontainers_modules::testcontainers::runners::AsyncRunner;
use testcontainers_modules::testcontainers::{ContainerAsync, ImageExt};

/// Starts a PostgreSQL container and returns an [EventStore] connected to it,
/// with the migrations applied. The container stops when dropped.
pub async fn start_event_store() -> (ContainerAsync<Postgres>, EventStore) {
    let container = Postgres::default()
        .with_tag("16-alpine")
        .start()
        .await
        .expect("the postgres container should start");

    let (host, port) = futures::try_join!(container.get_host(), container.get_host_port_ipv4(5432))
        .expect("the postgres container should have both a host and a port exposed");

    println!("postgres container is running at {host}:{port}");

    let manager = bb8_postgres::PostgresConnectionManager::new_from_stringlike(
        format!("postgres://postgres:postgres@{host}:{port}/postgres"),
        tokio_postgres::NoTls,
    )
    .expect("the dsn should be valid");

    let pool = bb8::Pool::builder()
        .build(manager)
        .await
        .expect("should be able to create a connection pool with the database");

    let store = EventStore::new(pool)
        .await
        .expect("the event store should be created and migrated");

    (container, store)
}

/// Returns a random wallet id.
pub fn wallet_id() -> String {
    format!("wallet-{}", rand::rng().random::<u32>())
}
