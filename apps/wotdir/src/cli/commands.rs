//! # CLI Command Implementations

use crate::api;
use crate::config::{AppConfig, Backend};
use std::path::{Path, PathBuf};
use wotdir_core::{Directory, DirectoryError, RebuildReport};

// =============================================================================
// PATH VALIDATION
// =============================================================================

/// Resolve the parent directory of an output file, which must exist.
fn validate_output_path(path: &Path) -> Result<PathBuf, DirectoryError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let canonical_parent = parent.canonicalize().map_err(|e| {
        DirectoryError::Internal(format!(
            "Invalid output directory '{}': {}",
            parent.display(),
            e
        ))
    })?;

    if !canonical_parent.is_dir() {
        return Err(DirectoryError::Internal(format!(
            "Output directory '{}' is not a valid directory",
            parent.display()
        )));
    }

    let filename = path
        .file_name()
        .ok_or_else(|| DirectoryError::Internal("Output path has no filename".to_string()))?;

    Ok(canonical_parent.join(filename))
}

// =============================================================================
// DIRECTORY LOADING
// =============================================================================

/// Open the configured store and load its partitions into the cache.
pub fn load_directory(config: &AppConfig) -> Result<(Directory, RebuildReport), DirectoryError> {
    let store = config.open_store()?;
    let (directory, report) = Directory::open(store, config.directory.clone())?;
    log_report(&report);
    Ok((directory, report))
}

fn log_report(report: &RebuildReport) {
    tracing::info!(
        event = "cache_rebuilt",
        loaded = report.loaded,
        skipped = report.skipped.len(),
        "Loaded things from store"
    );
    for (key, reason) in &report.skipped {
        tracing::warn!(event = "partition_skipped", key = %key, reason = %reason);
    }
}

fn print_json(value: &serde_json::Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_default()
    );
}

// =============================================================================
// SERVER COMMAND
// =============================================================================

pub async fn cmd_server(config: &AppConfig) -> Result<(), DirectoryError> {
    let store = config.open_store()?;
    let directory = Directory::new(store, config.directory.clone());

    println!("wotdir Thing Description Directory Starting...");
    println!();
    println!("Configuration:");
    println!("  Host:     {}", config.host);
    println!("  Port:     {}", config.port);
    println!("  Backend:  {}", config.backend);
    println!("  Database: {:?}", config.database);
    println!();
    println!("Endpoints:");
    println!("  GET    /things          - List things");
    println!("  POST   /things          - Register anonymous thing");
    println!("  GET    /things/{{id}}     - Retrieve thing");
    println!("  PUT    /things/{{id}}     - Create or replace thing");
    println!("  PATCH  /things/{{id}}     - Merge-patch thing");
    println!("  DELETE /things/{{id}}     - Delete thing");
    println!("  GET    /events[/{{type}}] - Server-Sent Events");
    println!("  GET    /health          - Health check");
    println!("  ANY    /                - Redirect to /things");
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    api::run_server(directory, config).await
}

// =============================================================================
// STATUS COMMAND
// =============================================================================

pub fn cmd_status(config: &AppConfig, json_mode: bool) -> Result<(), DirectoryError> {
    let (directory, report) = load_directory(config)?;
    let snapshot = directory.partitions()?;
    let partitions = snapshot.len();
    let triples: usize = snapshot.iter().map(|(_, triples)| triples.len()).sum();
    let things = directory.count()?;

    if json_mode {
        print_json(&serde_json::json!({
            "database": config.database.to_string_lossy(),
            "backend": config.backend.to_string(),
            "partitions": partitions,
            "things": things,
            "triples": triples,
            "skipped": report.skipped.len(),
            "events": directory.events().log().len()?,
        }));
        return Ok(());
    }

    println!("wotdir Status");
    println!("=============");
    println!("Database: {:?}", config.database);
    println!("Backend:  {}", config.backend);
    println!();
    println!("Partitions: {}", partitions);
    println!("Things:     {}", things);
    println!("Triples:    {}", triples);
    println!("Skipped:    {}", report.skipped.len());

    Ok(())
}

// =============================================================================
// EXPORT COMMAND
// =============================================================================

/// Write every partition in linear form, one `# graph <key>` header each.
pub fn cmd_export(config: &AppConfig, output: &Path) -> Result<(), DirectoryError> {
    let validated_output = validate_output_path(output)?;
    let store = config.open_store()?;
    let directory = Directory::new(store, config.directory.clone());

    let text = directory.export_linear()?;
    std::fs::write(&validated_output, text.as_bytes())
        .map_err(|e| DirectoryError::Internal(format!("Write file: {}", e)))?;

    println!("Exported {} bytes to {:?}", text.len(), validated_output);
    Ok(())
}

// =============================================================================
// REBUILD COMMAND
// =============================================================================

pub fn cmd_rebuild(config: &AppConfig, json_mode: bool) -> Result<(), DirectoryError> {
    let (_, report) = load_directory(config)?;

    if json_mode {
        print_json(&serde_json::to_value(&report).unwrap_or_default());
        return Ok(());
    }

    println!("Loaded:  {}", report.loaded);
    println!("Skipped: {}", report.skipped.len());
    for (key, reason) in &report.skipped {
        println!("  {}: {}", key, reason);
    }
    Ok(())
}

// =============================================================================
// INIT COMMAND
// =============================================================================

pub fn cmd_init(config: &AppConfig, force: bool) -> Result<(), DirectoryError> {
    if config.backend == Backend::Memory {
        println!("Memory backend keeps no database file; nothing to initialize");
        return Ok(());
    }

    let path = &config.database;
    if path.exists() {
        if !force {
            return Err(DirectoryError::Internal(
                "Database already exists. Use --force to overwrite.".to_string(),
            ));
        }
        std::fs::remove_file(path).map_err(|e| {
            DirectoryError::Internal(format!("Remove {}: {}", path.display(), e))
        })?;
    }

    let store = config.open_store()?;
    if !store.is_persistent() {
        return Err(DirectoryError::Internal(
            "Configured backend did not create a database file".to_string(),
        ));
    }
    println!("Initialized new redb database at {:?}", path);
    Ok(())
}
