// src/bin/pingpong.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `pingpong` binary: sweeps every pair of cores under a mask and
//! reports cache-line migration latency between them.

use std::time::Duration;

use clap::Parser;

use memchase::cli::PingPongArgs;

fn main() {
    let args = PingPongArgs::parse();
    memchase::init_logging(0);

    let rows = memchase::pingpong::sweep(
        args.mask,
        args.sweep_max,
        Duration::from_secs(args.time_slice_seconds),
        args.sep_char,
    );
    for row in rows {
        println!("{row}");
    }
}
