use anyhow::Result;

use wikigraph_core::{AppConfig, PageStatus};
use wikigraph_storage::Storage;

pub async fn run(config: AppConfig) -> Result<()> {
    let storage = Storage::new(&config.database.path).await?;

    match storage.check_connectivity().await {
        Ok(()) => println!("Database: connected ({})", config.database.path),
        Err(e) => {
            println!("Database: ERROR - {}", e);
            return Ok(());
        }
    }

    storage.run_migrations().await?;

    let total = storage.count_pages().await?;
    let pending = storage.count_pages_with_status(PageStatus::Pending).await?;
    let success = storage.count_pages_with_status(PageStatus::Success).await?;
    let redirects = storage.count_pages_with_status(PageStatus::Redirect).await?;
    let not_found = storage.count_pages_with_status(PageStatus::NotFound).await?;
    let errored = storage.count_pages_with_status(PageStatus::Error).await?;
    let links = storage.count_links().await?;

    let snapshot = std::path::Path::new(&config.graph.snapshot_path);
    let snapshot_line = if snapshot.exists() {
        let age = snapshot
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.elapsed().ok())
            .map(|d| format!("{}s old", d.as_secs()))
            .unwrap_or_else(|| "present".to_string());
        format!("{} ({})", config.graph.snapshot_path, age)
    } else {
        "none".to_string()
    };

    println!("\n╔══════════════════════════════════════════════╗");
    println!("║             WikiGraph Status                 ║");
    println!("╠══════════════════════════════════════════════╣");
    println!("║ Pages total:        {:>20}     ║", total);
    println!("║   pending:          {:>20}     ║", pending);
    println!("║   success:          {:>20}     ║", success);
    println!("║   redirect:         {:>20}     ║", redirects);
    println!("║   not_found:        {:>20}     ║", not_found);
    println!("║   error:            {:>20}     ║", errored);
    println!("║ Links stored:       {:>20}     ║", links);
    println!("╚══════════════════════════════════════════════╝");
    println!("Snapshot: {}\n", snapshot_line);

    Ok(())
}
