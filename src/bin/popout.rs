//! popout CLI
//!
//! Push, pop and inspect a queue folder of string items.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use popout::storage::SegmentInfo;
use popout::{BatchedQueue, FileQueue, QueueConfig, Result, SegmentKind, SyncedQueue};
use tracing_subscriber::{fmt, EnvFilter};

/// popout CLI
#[derive(Parser, Debug)]
#[command(name = "popout")]
#[command(about = "Inspect and maintain a disk-resident queue")]
#[command(version)]
struct Args {
    /// Queue folder
    #[arg(short, long, default_value = ".")]
    folder: PathBuf,

    /// Queue name (segment file prefix)
    #[arg(short, long, default_value = "queue")]
    name: String,

    /// Access mode the queue was written with
    #[arg(short, long, value_enum, default_value_t = Mode::Synced)]
    mode: Mode,

    /// Items per batch (batched mode)
    #[arg(short, long, default_value = "1024")]
    batch_size: usize,

    /// WAL segments kept before compaction (0 = default)
    #[arg(long, default_value = "0")]
    wal_max_count: usize,

    /// Size budget of one compressed file in bytes (0 = default)
    #[arg(long, default_value = "0")]
    compressed_max_size: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Mode {
    Synced,
    Batched,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Append items
    Push {
        /// Items to append, in order
        #[arg(required = true)]
        items: Vec<String>,
    },

    /// Remove and print the oldest items
    Pop {
        /// How many items to remove
        #[arg(short, long, default_value = "1")]
        count: usize,
    },

    /// Print the oldest item without removing it
    Peek,

    /// Print the number of items
    Len,

    /// Merge every WAL segment into compressed files
    Compress,

    /// List segment files and their sizes
    Inspect,
}

enum Queue {
    Synced(SyncedQueue<String>),
    Batched(BatchedQueue<String>),
}

impl Queue {
    fn open(args: &Args) -> Result<Self> {
        let config = QueueConfig::builder()
            .name(&args.name)
            .folder(&args.folder)
            .batch_size(args.batch_size)
            .wal_max_count(args.wal_max_count)
            .compressed_max_size(args.compressed_max_size)
            .build();

        Ok(match args.mode {
            Mode::Synced => Queue::Synced(SyncedQueue::open(config)?),
            Mode::Batched => Queue::Batched(BatchedQueue::open(config)?),
        })
    }

    fn as_queue(&self) -> &dyn FileQueue<String> {
        match self {
            Queue::Synced(queue) => queue,
            Queue::Batched(queue) => queue,
        }
    }

    fn segments(&self) -> Result<Vec<SegmentInfo>> {
        match self {
            Queue::Synced(queue) => queue.with_backend(|backend| backend.segments()),
            Queue::Batched(queue) => queue.with_backend(|backend| backend.segments()),
        }
    }

    fn close(self) -> Result<()> {
        match self {
            Queue::Synced(queue) => queue.close(),
            Queue::Batched(queue) => queue.close(),
        }
    }
}

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,popout=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if let Err(e) = run(&args) {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<()> {
    let queue = Queue::open(args)?;

    match &args.command {
        Commands::Push { items } => {
            let mut accepted = 0;
            for item in items {
                if queue.as_queue().offer(item.clone())? {
                    accepted += 1;
                }
            }
            println!("pushed {} item(s)", accepted);
        }
        Commands::Pop { count } => {
            for _ in 0..*count {
                match queue.as_queue().poll()? {
                    Some(item) => println!("{}", item),
                    None => break,
                }
            }
        }
        Commands::Peek => {
            if let Some(item) = queue.as_queue().peek()? {
                println!("{}", item);
            }
        }
        Commands::Len => println!("{}", queue.as_queue().len()),
        Commands::Compress => {
            queue.as_queue().compress()?;
            println!("compressed");
        }
        Commands::Inspect => {
            let segments = queue.segments()?;
            let mut total = 0;
            for segment in &segments {
                let kind = match segment.kind {
                    SegmentKind::Wal => "wal",
                    SegmentKind::Compressed => "compressed",
                };
                println!("{:<10} {:>12}  {}", kind, segment.size, segment.path.display());
                total += segment.size;
            }
            println!(
                "{} segment(s), {} bytes, {} item(s)",
                segments.len(),
                total,
                queue.as_queue().len()
            );
        }
    }

    queue.close()
}
