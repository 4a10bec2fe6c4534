//! Standalone connectivity smoke test for the departures database.
//!
//! Reads the same environment variables as the service, opens a single
//! connection and runs a test query. Exits non-zero on failure.

use sqlx::postgres::{PgConnectOptions, PgSslMode};
use sqlx::{Connection, PgConnection};

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

async fn check() -> Result<i32, sqlx::Error> {
    let server = env_or("SQL_SERVER", "localhost");
    let port = env_or("SQL_PORT", "5432").parse().unwrap_or(5432);
    let database = env_or("SQL_DATABASE", "irail");
    let user = env_or("SQL_USER", "postgres");
    let password = env_or("SQL_PASSWORD", "");

    let options = PgConnectOptions::new()
        .host(&server)
        .port(port)
        .database(&database)
        .username(&user)
        .password(&password)
        .ssl_mode(PgSslMode::Require);

    let mut conn = PgConnection::connect_with(&options).await?;
    let value: i32 = sqlx::query_scalar("SELECT 1").fetch_one(&mut conn).await?;
    conn.close().await?;

    Ok(value)
}

#[tokio::main]
async fn main() {
    match check().await {
        Ok(value) => println!("Connection successful, test query result: {}", value),
        Err(e) => {
            eprintln!("Connection failed: {}", e);
            std::process::exit(1);
        }
    }
}
