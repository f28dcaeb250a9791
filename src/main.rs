//! Bootstrap for declared collections.
//!
//! Reads the settings (first argument, or `ubostore.toml` when present),
//! creates every declared table and index and reports how many records each
//! collection holds. For flavors other than SQLite the statements are only
//! printed, so they can be applied by other means.

use rusqlite::Connection;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ubostore::persist::share;
use ubostore::schema::{create_index, create_index_sql, init_table, init_table_sql, Flavor};
use ubostore::settings::{CollectionSettings, Settings};
use ubostore::Result;

fn print_statements(flavor: Flavor, collection: &CollectionSettings) -> Result<()> {
    println!("{};", init_table_sql(flavor, &collection.table, &collection.column_defs())?);
    for index in &collection.indexes {
        let columns: Vec<&str> = index.columns.iter().map(String::as_str).collect();
        println!(
            "{};",
            create_index_sql(flavor, &collection.table, index.unique, true, &columns)?
        );
    }
    Ok(())
}

fn run(settings: &Settings) -> Result<()> {
    let flavor = settings.database.flavor;
    if flavor != Flavor::Sqlite {
        for collection in &settings.collections {
            collection.mapping()?;
            print_statements(flavor, collection)?;
        }
        return Ok(());
    }
    let conn = match &settings.database.path {
        Some(path) => Connection::open(path)?,
        None => Connection::open_in_memory()?,
    };
    for collection in &settings.collections {
        collection.mapping()?;
        init_table(&conn, flavor, &collection.table, &collection.column_defs())?;
        for index in &collection.indexes {
            let columns: Vec<&str> = index.columns.iter().map(String::as_str).collect();
            create_index(&conn, flavor, &collection.table, index.unique, true, &columns)?;
        }
    }
    let shared = share(conn);
    for collection in &settings.collections {
        let dao = collection.open_dao(shared.clone(), flavor)?;
        info!(table = dao.table(), records = dao.count(None)?, "collection ready");
    }
    Ok(())
}

fn main() {
    let file = std::env::args().nth(1);
    let settings = match Settings::load(file.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(2);
        }
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.logging.filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        path = settings.database.path.as_deref().unwrap_or(":memory:"),
        collections = settings.collections.len(),
        "bootstrapping"
    );
    if let Err(e) = run(&settings) {
        error!(error = %e, "bootstrap failed");
        std::process::exit(1);
    }
}
