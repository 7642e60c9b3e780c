//! tracker_check - validate a trackers directory
//!
//! Loads every tracker definition the daemon would load and reports pairs of trackers
//! that share marker ids. Such pairs can never be active at the same time.

use anyhow::{bail, Result};
use clap::Parser;
use std::collections::BTreeSet;
use std::path::PathBuf;

use marker_bridge::Store;

#[derive(Parser, Debug)]
#[command(name = "tracker_check", about = "Report marker conflicts between tracker definitions")]
struct Args {
    /// Directory of tracker JSON files
    #[arg(long, default_value = "trackers")]
    trackers: PathBuf,
    /// Exit non-zero on any conflict
    #[arg(long)]
    strict: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    // Only the trackers directory is read.
    let store = Store::new(&args.trackers, &args.trackers);
    let trackers = store.load_trackers()?;
    if trackers.is_empty() {
        bail!("no tracker definitions in {}", args.trackers.display());
    }

    for tracker in &trackers {
        let ids: Vec<String> = tracker.marker_ids().iter().map(|id| id.to_string()).collect();
        println!("{}: markers {}", tracker.id(), ids.join(","));
    }

    let mut conflicts = 0usize;
    let mut seen = BTreeSet::new();
    for tracker in &trackers {
        if !seen.insert(tracker.id()) {
            conflicts += 1;
            println!("duplicate: more than one file defines {}", tracker.id());
        }
    }
    for (i, first) in trackers.iter().enumerate() {
        for second in &trackers[i + 1..] {
            let shared = first.shared_markers(second);
            if !shared.is_empty() {
                conflicts += 1;
                println!(
                    "conflict: {} and {} share markers {:?}",
                    first.id(),
                    second.id(),
                    shared
                );
            }
        }
    }

    println!("{} trackers, {} conflicts", trackers.len(), conflicts);
    if args.strict && conflicts > 0 {
        bail!("{} tracker conflicts", conflicts);
    }
    Ok(())
}
