// src/bin/fairness.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `fairness` binary: hammers a shared atomic array from several pinned
//! threads with one contended-access primitive and reports how evenly the
//! increments landed.

use std::time::Duration;

use clap::Parser;

use memchase::cli::FairnessArgs;
use memchase::fairness::{fairness_ratio, run};

fn main() {
    let args = FairnessArgs::parse();
    memchase::init_logging(0);

    if let Err(e) = main_inner(args) {
        eprintln!("fairness: {e}");
        std::process::exit(1);
    }
}

fn main_inner(args: FairnessArgs) -> memchase::Result<()> {
    let counts = run(
        args.mode,
        args.nr_relax,
        args.nr_array_elts,
        args.nr_tested_cores,
        Duration::from_secs(1),
    )?;

    for (i, count) in counts.iter().enumerate() {
        println!("thread[{i}]: {count} increments");
    }
    println!("fairness_ratio: {:.4}", fairness_ratio(&counts));
    Ok(())
}
