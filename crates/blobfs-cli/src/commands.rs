use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use blobfs_config::path::normalize_or_original;
use blobfs_config::{log_cli_warn, log_store_info, Config, PROJECT_CONFIG};
use blobfs_store::{BlobId, BlobStore, FileSource, FsBlobStore};

fn open_store(config: &Config) -> Result<FsBlobStore> {
    let store_config = config.store_config();
    FsBlobStore::open(&store_config)
        .with_context(|| format!("Failed to open store at {}", store_config.directory.display()))
}

/// Open the store only if its root already exists, so lookups never create it.
fn open_existing(config: &Config) -> Result<Option<FsBlobStore>> {
    if config.store_config().directory.exists() {
        open_store(config).map(Some)
    } else {
        Ok(None)
    }
}

fn parse_id(store: &dyn BlobStore, id: &str) -> Result<BlobId> {
    store
        .create_id(id)
        .with_context(|| format!("Invalid blob id: {}", id))
}

pub fn save(config: &Config, files: &[PathBuf]) -> Result<ExitCode> {
    let store = open_store(config)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for file in files {
        let id = store
            .save(&mut FileSource::new(file))
            .with_context(|| format!("Failed to save {}", file.display()))?;
        log_store_info!("Saved blob", file = %file.display(), id = %id);
        writeln!(out, "{}", id)?;
    }
    Ok(ExitCode::SUCCESS)
}

pub fn load(config: &Config, id: &str, output: Option<&Path>) -> Result<ExitCode> {
    let Some(store) = open_existing(config)? else {
        bail!("Blob not found: {}", id);
    };
    let id = parse_id(&store, id)?;
    let mut payload = store.load(&id)?.open()?;

    match output {
        Some(path) => {
            let mut file = BufWriter::new(
                File::create(path)
                    .with_context(|| format!("Failed to create {}", path.display()))?,
            );
            let bytes = io::copy(&mut payload, &mut file)?;
            file.flush()?;
            log_store_info!("Loaded blob", id = %id, bytes, output = %path.display());
        }
        None => {
            let stdout = io::stdout();
            let mut out = stdout.lock();
            io::copy(&mut payload, &mut out)?;
            out.flush()?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

pub fn find(config: &Config, id: &str) -> Result<ExitCode> {
    let handle = match open_existing(config)? {
        Some(store) => store.find(&parse_id(&store, id)?),
        None => blobfs_store::BlobHandle::unavailable(),
    };
    match (handle.location(), handle.size()) {
        (Some(path), Some(size)) => {
            println!("{}\t{} bytes", path.display(), size);
            Ok(ExitCode::SUCCESS)
        }
        _ => {
            println!("unavailable");
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Delete every id; failures are reported and make the exit code non-zero
/// but do not stop the remaining deletes.
pub fn delete(config: &Config, ids: &[String]) -> Result<ExitCode> {
    let Some(store) = open_existing(config)? else {
        for id in ids {
            println!("not found\t{}", id);
        }
        return Ok(ExitCode::SUCCESS);
    };

    let mut failed = 0usize;
    for raw in ids {
        let result = parse_id(&store, raw).and_then(|id| Ok(store.delete(&id)?));
        match result {
            Ok(true) => {
                log_store_info!("Deleted blob", id = %raw);
                println!("deleted\t{}", raw);
            }
            Ok(false) => println!("not found\t{}", raw),
            Err(e) => {
                failed += 1;
                log_cli_warn!("Delete failed", id = %raw, error = %e);
                eprintln!("error\t{}\t{:#}", raw, e);
            }
        }
    }
    Ok(if failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

pub fn status(config: &Config, json: bool) -> Result<ExitCode> {
    let Some(store) = open_existing(config)? else {
        println!(
            "Store not initialized at {}",
            config.store_config().directory.display()
        );
        return Ok(ExitCode::SUCCESS);
    };
    let stats = store.stats()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(ExitCode::SUCCESS);
    }

    println!("Root:    {}", normalize_or_original(store.root()).display());
    println!("Mode:    {}", store.mode());
    println!("Digest:  {}", store.digest());
    println!(
        "Blobs:   {} ({}, avg {})",
        stats.blob_count,
        format_bytes(stats.total_bytes),
        format_bytes(stats.avg_blob_size())
    );
    println!("Markers: {}", stats.marker_count);
    println!("Staged:  {}", stats.staged_count);
    Ok(ExitCode::SUCCESS)
}

pub fn config_show(config: &Config) -> Result<ExitCode> {
    print!("{}", config.to_toml()?);
    Ok(ExitCode::SUCCESS)
}

pub fn config_path() -> Result<ExitCode> {
    match Config::global_config_path() {
        Some(path) => println!("Global:  {}{}", path.display(), existence(&path)),
        None => println!("Global:  (no home directory)"),
    }
    let project = Path::new(PROJECT_CONFIG);
    println!(
        "Project: {}{}",
        normalize_or_original(project).display(),
        existence(project)
    );
    Ok(ExitCode::SUCCESS)
}

fn existence(path: &Path) -> &'static str {
    if path.exists() {
        ""
    } else {
        " (not found)"
    }
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
