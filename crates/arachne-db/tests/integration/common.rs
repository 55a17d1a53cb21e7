use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};

/// SQL migration statements, executed one at a time.
const MIGRATIONS: &[&str] = &[
    // 001_broker.sql
    r#"CREATE TABLE IF NOT EXISTS broker_kv (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS broker_sets (
        set_key TEXT NOT NULL,
        member TEXT NOT NULL,
        PRIMARY KEY (set_key, member)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS broker_queue (
        id BIGSERIAL PRIMARY KEY,
        queue_key TEXT NOT NULL,
        payload TEXT NOT NULL
    )"#,
    r#"CREATE INDEX IF NOT EXISTS idx_broker_queue_key ON broker_queue(queue_key, id)"#,
    r#"CREATE TABLE IF NOT EXISTS broker_stream (
        id BIGSERIAL PRIMARY KEY,
        stream_key TEXT NOT NULL,
        payload TEXT NOT NULL
    )"#,
    r#"CREATE INDEX IF NOT EXISTS idx_broker_stream_key ON broker_stream(stream_key, id)"#,
];

/// Spins up a PostgreSQL container and returns a connected pool.
///
/// The `ContainerAsync` must stay in scope for the whole test: dropping it
/// stops the container.
pub async fn setup_test_db() -> (PgPool, ContainerAsync<GenericImage>) {
    let container = GenericImage::new("postgres", "16")
        .with_exposed_port(ContainerPort::Tcp(5432))
        .with_wait_for(WaitFor::message_on_stderr(
            "database system is ready to accept connections",
        ))
        .with_env_var("POSTGRES_PASSWORD", "postgres")
        .with_env_var("POSTGRES_DB", "arachne_test")
        .start()
        .await
        .expect("Failed to start PostgreSQL container");

    let host = container.get_host().await.expect("Failed to get host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("Failed to get port");

    let connection_string = format!("postgresql://postgres:postgres@{host}:{port}/arachne_test");

    // Retry connection until container is fully ready
    const MAX_RETRIES: u32 = 30;
    let mut retries = 0;
    let pool = loop {
        match PgPoolOptions::new()
            .max_connections(10)
            .connect(&connection_string)
            .await
        {
            Ok(pool) => break pool,
            Err(e) => {
                retries += 1;
                if retries >= MAX_RETRIES {
                    panic!("Failed to connect to database after {MAX_RETRIES} retries: {e}");
                }
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        }
    };

    // Run migrations one statement at a time
    for migration in MIGRATIONS {
        sqlx::query(migration)
            .execute(&pool)
            .await
            .expect("Failed to run migration");
    }

    (pool, container)
}
