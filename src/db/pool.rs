use sqlx::postgres::{PgPool, PgPoolOptions};

/// Bounded connection pool — the shared resource every request handler and
/// the Settlement Worker contend over (`spec.md` §5, "Shared resources").
pub async fn connect(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
}
