use clap::Parser;
use prettytable::{Table, row};
use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use lockpool::{
    BufferError, BufferPool, BufferResult, Catalog, PoolConfig, TableId, TransactionId,
};

const TABLE_NAME: &str = "workload";

/// Run a concurrent insert workload against a heap table through the buffer pool
#[derive(Debug, Parser)]
#[command(name = "lockpool", version)]
struct Args {
    /// Directory holding the table files and catalog
    #[arg(long, default_value = "lockpool-data")]
    dir: PathBuf,

    /// JSON pool config; flags below override its fields
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    capacity: Option<usize>,

    #[arg(long)]
    abort_timeout_ms: Option<u64>,

    #[arg(long)]
    poll_interval_ms: Option<u64>,

    #[arg(long, default_value_t = 4)]
    threads: usize,

    /// Transactions per thread
    #[arg(long, default_value_t = 50)]
    transactions: usize,

    #[arg(long, default_value_t = 3)]
    tuples_per_txn: usize,

    /// Deliberately abort every n-th transaction (0 = never)
    #[arg(long, default_value_t = 10)]
    abort_every: usize,

    /// Tuple size for a newly created table
    #[arg(long, default_value_t = 64)]
    record_size: usize,

    /// Retries of a transaction that timed out before giving up on it
    #[arg(long, default_value_t = 20)]
    max_retries: usize,
}

#[derive(Debug, Default, Clone, Copy)]
struct WorkerStats {
    committed: usize,
    aborted: usize,
    retries: usize,
    gave_up: usize,
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;
    info!(?config, "starting workload");

    fs::create_dir_all(&args.dir)?;
    let catalog_path = args.dir.join("catalog.json");
    let catalog = if catalog_path.exists() {
        Catalog::load(&catalog_path)?
    } else {
        Catalog::new()
    };
    let table_id = match catalog.table_id(TABLE_NAME) {
        Some(id) => id,
        None => catalog.create_heap_table(&args.dir, TABLE_NAME, args.record_size)?,
    };
    let catalog = Arc::new(catalog);
    let heap = catalog
        .heap_file(table_id)
        .ok_or("workload table is not a heap table")?;
    let record_size = heap.record_size();

    let pool = Arc::new(BufferPool::new(config, catalog.clone())?);
    let before = count_tuples(&pool, table_id)?;

    let started = Instant::now();
    let handles: Vec<_> = (0..args.threads)
        .map(|worker| {
            let pool = Arc::clone(&pool);
            let args = WorkerArgs {
                worker,
                table_id,
                record_size,
                transactions: args.transactions,
                tuples_per_txn: args.tuples_per_txn,
                abort_every: args.abort_every,
                max_retries: args.max_retries,
            };
            thread::spawn(move || run_worker(&pool, args))
        })
        .collect();

    let mut stats = Vec::with_capacity(handles.len());
    for handle in handles {
        let worker_stats = handle.join().map_err(|_| "worker thread panicked")??;
        stats.push(worker_stats);
    }
    let elapsed = started.elapsed();

    pool.flush_all()?;
    heap.sync()?;
    catalog.save(&catalog_path)?;

    let after = count_tuples(&pool, table_id)?;
    let committed: usize = stats.iter().map(|s| s.committed).sum();
    let expected = before + committed * args.tuples_per_txn;

    print_summary(&stats, elapsed);
    println!("tuples: {} before, {} after, {} expected", before, after, expected);

    if after != expected {
        return Err(format!("tuple count mismatch: found {}, expected {}", after, expected).into());
    }
    Ok(())
}

fn load_config(args: &Args) -> Result<PoolConfig, Box<dyn Error>> {
    let mut config = match &args.config {
        Some(path) => PoolConfig::from_json_file(path)?,
        None => PoolConfig::default(),
    };
    if let Some(capacity) = args.capacity {
        config.capacity = capacity;
    }
    if let Some(ms) = args.abort_timeout_ms {
        config.abort_timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = args.poll_interval_ms {
        config.poll_interval = Duration::from_millis(ms);
    }
    config.validate()?;
    Ok(config)
}

fn count_tuples(pool: &BufferPool, table_id: TableId) -> BufferResult<usize> {
    let heap = pool
        .catalog()
        .heap_file(table_id)
        .ok_or(BufferError::UnknownTable(table_id))?;
    let txn = TransactionId::new();
    match heap.scan(pool, txn) {
        Ok(tuples) => {
            pool.commit(txn)?;
            Ok(tuples.len())
        }
        Err(e) => {
            pool.abort(txn);
            Err(e)
        }
    }
}

struct WorkerArgs {
    worker: usize,
    table_id: TableId,
    record_size: usize,
    transactions: usize,
    tuples_per_txn: usize,
    abort_every: usize,
    max_retries: usize,
}

fn run_worker(pool: &BufferPool, args: WorkerArgs) -> BufferResult<WorkerStats> {
    let mut stats = WorkerStats::default();

    for seq in 0..args.transactions {
        let abort = args.abort_every > 0 && (seq + 1) % args.abort_every == 0;
        let tuples: Vec<Vec<u8>> = (0..args.tuples_per_txn)
            .map(|n| make_tuple(args.record_size, args.worker, seq, n))
            .collect();

        let mut attempt = 0;
        loop {
            match run_transaction(pool, args.table_id, &tuples, abort) {
                Ok(true) => stats.committed += 1,
                Ok(false) => stats.aborted += 1,
                Err(BufferError::TransactionAborted(_) | BufferError::CapacityExhausted { .. })
                    if attempt < args.max_retries =>
                {
                    attempt += 1;
                    stats.retries += 1;
                    continue;
                }
                Err(e @ (BufferError::TransactionAborted(_) | BufferError::CapacityExhausted { .. })) => {
                    warn!(worker = args.worker, seq, error = %e, "giving up on transaction");
                    stats.gave_up += 1;
                }
                Err(e) => return Err(e),
            }
            break;
        }
    }

    info!(worker = args.worker, ?stats, "worker finished");
    Ok(stats)
}

/// Insert `tuples` in one transaction. Returns whether it committed.
/// On any error the transaction is aborted before returning.
fn run_transaction(
    pool: &BufferPool,
    table_id: TableId,
    tuples: &[Vec<u8>],
    abort: bool,
) -> BufferResult<bool> {
    let txn = TransactionId::new();
    for tuple in tuples {
        if let Err(e) = pool.insert_tuple(txn, table_id, tuple) {
            pool.abort(txn);
            return Err(e);
        }
    }

    if abort {
        pool.abort(txn);
        return Ok(false);
    }
    if let Err(e) = pool.commit(txn) {
        pool.abort(txn);
        return Err(e);
    }
    Ok(true)
}

/// Worker, sequence and position packed little-endian at the front, zero padded
fn make_tuple(record_size: usize, worker: usize, seq: usize, n: usize) -> Vec<u8> {
    let mut tuple = vec![0u8; record_size];
    let header = [worker as u32, seq as u32, n as u32];
    for (chunk, value) in tuple.chunks_mut(4).zip(header) {
        let bytes = value.to_le_bytes();
        chunk.copy_from_slice(&bytes[..chunk.len()]);
    }
    tuple
}

fn print_summary(stats: &[WorkerStats], elapsed: Duration) {
    let mut table = Table::new();
    table.add_row(row!["Worker", "Committed", "Aborted", "Retries", "Gave up"]);
    let mut total = WorkerStats::default();
    for (worker, s) in stats.iter().enumerate() {
        table.add_row(row![worker, s.committed, s.aborted, s.retries, s.gave_up]);
        total.committed += s.committed;
        total.aborted += s.aborted;
        total.retries += s.retries;
        total.gave_up += s.gave_up;
    }
    table.add_row(row![
        "total",
        total.committed,
        total.aborted,
        total.retries,
        total.gave_up
    ]);
    table.printstd();
    println!("elapsed: {:.2?}", elapsed);
}
