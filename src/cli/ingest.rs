//! Ingest command implementation

use anyhow::Result;

use crate::adapter::AdapterRegistry;
use crate::ingest::Ingestor;
use crate::store::Store;

pub fn run(store: &Store, registry: &AdapterRegistry, device_id: &str) -> Result<()> {
    let ingestor = Ingestor::new(store, registry, device_id);

    let registered = ingestor.auto_register()?;
    if registered > 0 {
        println!("Registered {} new sources", registered);
    }

    let summary = ingestor.ingest_all();
    println!(
        "Ingested {} events from {} sources ({} missing, {} errors)",
        summary.events_inserted, summary.sources, summary.missing, summary.errors
    );

    Ok(())
}
