//! Runs a random push/pop workload against a disk-backed deque and reports timings.

use clap::Parser;
use rand::{Rng, SeedableRng};
use spilldeque::storage::vfs;
use spilldeque::{Config, Deque};
use std::collections;
use std::path;
use std::time;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// CLI arguments for the deque benchmark.
#[derive(Parser, Debug)]
#[command(about = "Disk-backed deque workload runner")]
struct Args {
  /// Directory for block files. A temporary directory is used when absent.
  #[arg(short, long)]
  root: Option<path::PathBuf>,

  /// Path to a deque config file (TOML).
  #[arg(short, long)]
  config: Option<path::PathBuf>,

  /// Number of operations in the random workload.
  #[arg(short = 'n', long, default_value_t = 1_000_000)]
  count: u64,

  /// Seed for the random workload.
  #[arg(short, long, default_value_t = 0)]
  seed: u64,

  /// Replay the workload on an in-memory deque and compare the contents.
  #[arg(long)]
  verify: bool,
}

impl Args {
  fn load_config(&self) -> anyhow::Result<Config> {
    match &self.config {
      Some(path) => Ok(Config::from_toml(&std::fs::read_to_string(path)?)?),
      None => Ok(Config::default()),
    }
  }
}

fn run(root: &path::Path, args: &Args, config: Config) -> anyhow::Result<()> {
  let mut deque = Deque::<u64>::with_config(vfs::StandardFileSystem, root, config)?;
  let mut reference = args.verify.then(collections::VecDeque::new);
  let mut rng = rand::rngs::StdRng::seed_from_u64(args.seed);
  info!(root = %root.display(), capacity = deque.block_capacity(), namespace = %deque.namespace(), "starting workload");

  let start = time::Instant::now();
  for step in 0..args.count {
    // Pushes outnumber pops so that the deque keeps growing across block boundaries.
    match rng.gen_range(0..8) {
      0..=2 => {
        deque.push_back(step)?;
        if let Some(reference) = reference.as_mut() {
          reference.push_back(step);
        }
      }
      3..=4 => {
        deque.push_front(step)?;
        if let Some(reference) = reference.as_mut() {
          reference.push_front(step);
        }
      }
      5..=6 if !deque.is_empty() => {
        let record = deque.pop_back()?;
        if let Some(expected) = reference.as_mut().and_then(collections::VecDeque::pop_back) {
          anyhow::ensure!(record == expected, "pop_back returned {record}, expected {expected}");
        }
      }
      _ if !deque.is_empty() => {
        let record = deque.pop_front()?;
        if let Some(expected) = reference.as_mut().and_then(collections::VecDeque::pop_front) {
          anyhow::ensure!(record == expected, "pop_front returned {record}, expected {expected}");
        }
      }
      _ => {}
    }
  }
  info!(len = %deque.len(), elapsed = ?start.elapsed(), cached = deque.cached_blocks(), "finished workload");

  let start = time::Instant::now();
  let mut sum = 0u64;
  for (index, record) in deque.iter()?.enumerate() {
    let record = record?;
    sum = sum.wrapping_add(record);
    if let Some(reference) = &reference {
      anyhow::ensure!(reference.get(index) == Some(&record), "record {index} differs from the reference");
    }
  }
  info!(sum, elapsed = ?start.elapsed(), "iterated");

  let start = time::Instant::now();
  let mut drained = 0u64;
  while !deque.is_empty() {
    deque.pop_front()?;
    drained += 1;
  }
  info!(drained, elapsed = ?start.elapsed(), "drained");
  deque.close()?;
  Ok(())
}

fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();
  let args = Args::parse();
  let config = args.load_config()?;
  match &args.root {
    Some(root) => run(root, &args, config),
    None => {
      let tempdir = tempfile::tempdir()?;
      run(tempdir.path(), &args, config)
    }
  }
}
