//! Threaded soak test for the blocking arena channel.
//!
//! A producer thread streams a deterministic byte pattern in randomly sized,
//! often short writes, either pumped from a chunked source or filled by hand.
//! A consumer thread reads it back with random exact and best-effort reads
//! and checks every byte. Progress flows back to the main thread, which logs
//! throughput until both sides finish.

use std::io;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, ensure, Context, Result};
use clap::Parser;
use crossbeam_channel::Sender;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use stream_arena::{
    channel, ArenaConfig, ArenaError, ByteSource, Consumer, Producer, ReadGrant,
};
use tracing::{debug, info};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about = "Soak test for the zero-copy arena channel")]
struct Args {
    /// Total arena storage in bytes, consolidation prefix included
    #[arg(long, default_value_t = 4096)]
    capacity: usize,

    /// Largest single read; also the consolidation prefix size
    #[arg(long, default_value_t = 256)]
    max_read: usize,

    /// Largest single write reservation (defaults to the writable capacity)
    #[arg(long)]
    max_write: Option<usize>,

    /// Bytes to stream before stopping
    #[arg(long, default_value_t = 16 << 20)]
    total_bytes: usize,

    /// Blocking timeout for every open, in milliseconds
    #[arg(long, default_value_t = 1000)]
    timeout_ms: u64,

    /// Seed for the producer and consumer size generators
    #[arg(long, default_value_t = 0x5EED)]
    seed: u64,

    /// Log progress every this many bytes consumed
    #[arg(long, default_value_t = 1 << 20)]
    report_every: usize,
}

#[derive(Clone, Copy, Debug)]
enum Progress {
    Written(usize),
    Read { bytes: usize, consolidated: bool },
}

/// How long an exact read waits before settling for whatever is buffered.
const EXACT_PATIENCE: Duration = Duration::from_millis(5);

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let config = ArenaConfig::new(args.capacity, args.max_read);
    config.validate().context("invalid arena geometry")?;
    let writable = config.writable_capacity();
    let max_write = args.max_write.unwrap_or(writable);
    ensure!(
        (1..=writable).contains(&max_write),
        "max-write must be between 1 and {writable}"
    );

    let (producer, consumer) = channel(&config).context("failed to build arena channel")?;
    let timeout = Duration::from_millis(args.timeout_ms);
    let (tx, rx) = crossbeam_channel::unbounded();

    info!(
        capacity = config.capacity,
        max_read = config.max_read_block,
        max_write,
        total = args.total_bytes,
        "starting soak"
    );
    let started = Instant::now();

    let writer = {
        let tx = tx.clone();
        let plan = Plan {
            total: args.total_bytes,
            max_len: max_write,
            timeout,
            seed: args.seed,
        };
        thread::Builder::new()
            .name("soak-producer".into())
            .spawn(move || run_producer(producer, plan, tx))
            .context("failed to spawn producer")?
    };
    let reader = {
        let plan = Plan {
            total: args.total_bytes,
            max_len: config.max_read_block,
            timeout,
            seed: args.seed.rotate_left(32),
        };
        thread::Builder::new()
            .name("soak-consumer".into())
            .spawn(move || run_consumer(consumer, plan, tx))
            .context("failed to spawn consumer")?
    };

    let mut written = 0usize;
    let mut read = 0usize;
    let mut consolidated_reads = 0usize;
    let mut next_report = args.report_every;
    for event in rx.iter() {
        match event {
            Progress::Written(bytes) => written += bytes,
            Progress::Read {
                bytes,
                consolidated,
            } => {
                read += bytes;
                consolidated_reads += usize::from(consolidated);
                if read >= next_report {
                    let secs = started.elapsed().as_secs_f64().max(f64::EPSILON);
                    info!(
                        written,
                        read,
                        consolidated_reads,
                        mib_per_sec = read as f64 / secs / (1 << 20) as f64,
                        "progress"
                    );
                    next_report = next_report.saturating_add(args.report_every);
                }
            }
        }
    }

    let producer = writer
        .join()
        .map_err(|_| anyhow!("producer thread panicked"))??;
    let consumer = reader
        .join()
        .map_err(|_| anyhow!("consumer thread panicked"))??;

    ensure!(
        written == args.total_bytes && read == args.total_bytes,
        "stream ended early: wrote {written}, read {read}"
    );
    ensure!(consumer.channel().is_empty(), "bytes left in the arena");

    let metrics = producer.channel().metrics();
    let stats = producer.channel().stats();
    info!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        ?metrics,
        ?stats,
        "soak complete"
    );
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // Ignore error if already set (e.g., during tests).
    let _ = fmt().with_env_filter(env_filter).try_init();
}

fn pattern(index: usize) -> u8 {
    (index % 251) as u8
}

#[derive(Clone, Copy, Debug)]
struct Plan {
    total: usize,
    max_len: usize,
    timeout: Duration,
    seed: u64,
}

/// Produces the stream pattern up to `end`, a random number of bytes (at
/// most `max_chunk`) per call.
struct PatternSource {
    next: usize,
    end: usize,
    max_chunk: usize,
    rng: StdRng,
}

impl ByteSource for PatternSource {
    fn fill(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let cap = buf.len().min(self.end - self.next);
        if cap == 0 {
            return Ok(0);
        }
        let n = self.rng.gen_range(1..=cap.min(self.max_chunk));
        for (i, byte) in buf[..n].iter_mut().enumerate() {
            *byte = pattern(self.next + i);
        }
        self.next += n;
        Ok(n)
    }
}

fn run_producer(mut producer: Producer, plan: Plan, tx: Sender<Progress>) -> Result<Producer> {
    let mut rng = StdRng::seed_from_u64(plan.seed);
    let mut source = PatternSource {
        next: 0,
        end: plan.total,
        max_chunk: plan.max_len.div_ceil(3),
        rng: StdRng::seed_from_u64(plan.seed ^ 0xA5A5),
    };
    while source.next < plan.total {
        let len = rng.gen_range(1..=plan.max_len);
        let sent = source.next;

        let published = if rng.gen_bool(0.5) {
            producer
                .pump_from(&mut source, len, plan.timeout)
                .with_context(|| format!("pump_from({len}) stalled after {sent} bytes"))?
        } else {
            let mut grant = producer
                .write_open(len, plan.timeout)
                .with_context(|| format!("write_open({len}) stalled after {sent} bytes"))?;

            // Publish less than reserved, sometimes leaving a gap before each
            // pass that the arena compacts away.
            let want = rng.gen_range(1..=len);
            while grant.filled() < want {
                let filled = grant.filled();
                let step = rng.gen_range(1..=want - filled);
                let gap = rng.gen_range(0..=len - filled - step);
                let n = source.fill(&mut grant.unfilled()[gap..gap + step])?;
                if n == 0 {
                    break;
                }
                grant.write(filled + gap, n)?;
            }
            grant.close()?
        };

        // The receiver only disappears when main is already unwinding.
        let _ = tx.send(Progress::Written(published));
    }
    debug!(sent = source.next, "producer finished");
    Ok(producer)
}

fn run_consumer(mut consumer: Consumer, plan: Plan, tx: Sender<Progress>) -> Result<Consumer> {
    let mut rng = StdRng::seed_from_u64(plan.seed);
    let mut received = 0usize;
    while received < plan.total {
        let len = rng.gen_range(1..=plan.max_len);

        if rng.gen_bool(0.5) && plan.total - received >= len {
            match consumer.read_open(len, true, EXACT_PATIENCE) {
                Ok(grant) => {
                    let consolidated = grant.is_consolidated();
                    let bytes = verify(grant, received)?;
                    received += bytes;
                    let _ = tx.send(Progress::Read {
                        bytes,
                        consolidated,
                    });
                    continue;
                }
                Err(ArenaError::Incomplete { .. } | ArenaError::Empty) => {}
                Err(err) => return Err(err.into()),
            }
        }

        let grant = consumer
            .read_open(len, false, plan.timeout)
            .with_context(|| format!("read_open({len}) stalled after {received} bytes"))?;
        let consolidated = grant.is_consolidated();
        let bytes = verify(grant, received)?;
        received += bytes;
        let _ = tx.send(Progress::Read {
            bytes,
            consolidated,
        });
    }
    debug!(received, "consumer finished");
    Ok(consumer)
}

/// Checks the borrowed bytes against the stream pattern and releases them.
fn verify(grant: ReadGrant<'_>, offset: usize) -> Result<usize> {
    if let Some(at) = grant
        .iter()
        .enumerate()
        .position(|(i, byte)| *byte != pattern(offset + i))
    {
        bail!(
            "byte {} corrupted: expected {}, found {}",
            offset + at,
            pattern(offset + at),
            grant[at]
        );
    }
    Ok(grant.close()?)
}
