//! Watch a directory tree and print a line per directory change, plus the
//! file-level delta an index distills from each change.

use std::io::IsTerminal;
use std::path::Path;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use crossbeam_channel::unbounded;
use dirwatch_index::Index;
use dirwatch_monitor::Monitor;
use dirwatch_monitor::MonitorBuilder;
use tracing::info;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dirwatch")]
#[command(about = "Watch a directory tree for directory-granular changes")]
struct Cli {
    /// Directory to watch
    #[arg(default_value = ".")]
    dir: PathBuf,

    /// Throttle window in milliseconds; 0 disables throttling
    #[arg(long, default_value_t = 50)]
    latency_ms: u64,

    /// Eagerly index whole subtrees instead of on first activity
    #[arg(long)]
    strict: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .init();

    let cli = Cli::parse();

    let mut monitor = MonitorBuilder::new(&cli.dir)
        .latency(Duration::from_millis(cli.latency_ms))
        .build()
        .with_context(|| format!("failed to create monitor for '{}'", cli.dir.display()))?;

    let events = monitor
        .start()
        .with_context(|| format!("failed to start monitor for '{}'", cli.dir.display()))?;

    let errors = monitor.errors();
    thread::spawn(move || {
        for err in errors.iter() {
            warn!("{err}");
        }
    });

    let root = monitor.dir().to_path_buf();
    info!("watching '{}'", root.display());

    // The index consumes its own copy of the event stream; deltas come
    // back out as file-level changes.
    let (index_tx, index_rx) = unbounded();
    let index = if cli.strict {
        Index::strict(index_rx)
    } else {
        Index::lazy(index_rx)
    };
    let deltas = index.deltas();
    thread::spawn(move || index.run());
    thread::spawn(move || {
        for delta in deltas.iter() {
            print!("{}", delta.diff);
        }
    });

    for ev in events.iter() {
        println!("something happened in '/{}'", relative_to(&root, ev.dir()));
        let _ = index_tx.send(ev);
    }

    // The event stream closed: the monitor wound down (stopped, or the
    // watched root disappeared). A normal shutdown either way.
    info!("event stream closed; exiting");
    Ok(())
}

fn relative_to(root: &Path, dir: &Path) -> String {
    dir.strip_prefix(root)
        .unwrap_or(dir)
        .display()
        .to_string()
}
