//! Sets up the schema and walks through a few sample reads and writes.
//!
//! Usage: `invest_store [DB_PATH]`. Replaying the bundled schema keeps any
//! existing rows; the sample inserts are skipped with a logged error when the
//! rows are already there.

use anyhow::Result;
use invest_store::{DataStore, Params, SqliteConfig, Value};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut config = SqliteConfig::default();
    if let Some(path) = std::env::args().nth(1) {
        config = config.with_db_path(path);
    }
    let store = DataStore::new(config);

    println!("Initializing database at: {}", store.path().display());
    store.init_schema()?;
    println!("Database initialized");

    if let Some(user_id) =
        store.execute_or_none("INSERT INTO users (username) VALUES (?)", ["TesteUser"])
    {
        println!("User 'TesteUser' added with id {user_id}");
    }

    let users = store.fetch_all_or_empty("SELECT * FROM users", ());
    println!("\nUsers in database:");
    for user in &users {
        println!(
            "id: {}, username: {}",
            user["id"].as_i64().unwrap_or_default(),
            user["username"].as_str().unwrap_or_default()
        );
    }

    let asset = Params::new()
        .with_value("XPTO11.SA")
        .with_value("Fundo XPTO")
        .with_value("Fundos Imobiliários");
    if let Some(asset_id) = store.execute_or_none(
        "INSERT INTO assets (ticker, name, sector) VALUES (?, ?, ?)",
        asset,
    ) {
        println!("Asset 'XPTO11.SA' added with id {asset_id}");
    }

    if let Some(xpto) =
        store.fetch_one_or_none("SELECT * FROM assets WHERE ticker = ?", ["XPTO11.SA"])
    {
        println!(
            "\nAsset found: {} ({})",
            xpto.get("name").and_then(Value::as_str).unwrap_or_default(),
            xpto.get("ticker").and_then(Value::as_str).unwrap_or_default()
        );
    }

    Ok(())
}
