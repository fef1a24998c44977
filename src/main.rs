//! pinned-file-cache: workload driver for the pinned file cache.
//!
//! Runs a number of worker threads against one shared cache. Each worker
//! owns a set of files and, per round, pins them, writes a pattern, unpins,
//! pins again and verifies the pattern reads back intact.

use std::thread;

use anyhow::{bail, ensure, Context};
use clap::Parser;
use tracing::{debug, info};

use pinned_file_cache::config::{Cli, Config};
use pinned_file_cache::FileCache;

/// Two-letter pattern for a file, e.g. "abababab".
fn pattern_for(index: usize) -> Vec<u8> {
    let first = b'a' + ((2 * index) % 26) as u8;
    let second = b'a' + ((2 * index + 1) % 26) as u8;
    [first, second].repeat(4)
}

fn run_worker(cache: &FileCache, worker: usize, files: usize, rounds: usize) -> anyhow::Result<()> {
    let names: Vec<String> = (0..files).map(|f| format!("worker{worker}-file{f}")).collect();

    for round in 0..rounds {
        cache
            .pin(&names)?
            .into_result()
            .with_context(|| format!("worker {worker}: pin for write"))?;
        for (i, name) in names.iter().enumerate() {
            let pattern = pattern_for(worker * files + i + round);
            cache.write(name)?[..pattern.len()].copy_from_slice(&pattern);
        }
        cache.unpin(&names);

        cache
            .pin(&names)?
            .into_result()
            .with_context(|| format!("worker {worker}: pin for verify"))?;
        for (i, name) in names.iter().enumerate() {
            let pattern = pattern_for(worker * files + i + round);
            let data = cache.read(name)?;
            if data[..pattern.len()] != pattern[..] {
                cache.unpin(&names);
                bail!("worker {worker}: {name} did not round-trip in round {round}");
            }
        }
        cache.unpin(&names);
        debug!(worker, round, "Round complete");
    }

    Ok(())
}

fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "pinned_file_cache=debug"
    } else {
        "pinned_file_cache=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .init();

    info!("pinned-file-cache v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let mut config = Config::load(&cli.config)?;
    config.apply_cli(&cli);

    let workload = config.workload.clone();
    ensure!(
        workload.files_per_thread <= config.cache.max_entries,
        "files_per_thread ({}) exceeds max_entries ({})",
        workload.files_per_thread,
        config.cache.max_entries
    );

    info!(
        storage_dir = %config.cache.storage_dir.display(),
        max_entries = config.cache.max_entries,
        file_size = config.cache.file_size,
        threads = workload.threads,
        files_per_thread = workload.files_per_thread,
        rounds = workload.rounds,
        "Configuration loaded"
    );

    let cache = FileCache::open(&config.cache, config.eviction.clone())?;

    let (files, rounds) = (workload.files_per_thread, workload.rounds);
    thread::scope(|scope| -> anyhow::Result<()> {
        let handles: Vec<_> = (0..workload.threads)
            .map(|worker| {
                let cache = &cache;
                scope.spawn(move || run_worker(cache, worker, files, rounds))
            })
            .collect();

        for handle in handles {
            match handle.join() {
                Ok(result) => result?,
                Err(_) => bail!("worker thread panicked"),
            }
        }
        Ok(())
    })?;

    let stats = cache.stats();
    info!(
        hits = stats.hits,
        misses = stats.misses,
        evictions = stats.evictions,
        flushes = stats.flushes,
        waits = stats.waits,
        "Finished successfully"
    );

    Ok(())
}
