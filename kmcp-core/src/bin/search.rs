//! Granular per-stage binary: queries a built database and streams
//! containment hits as TSV, one worker per query, order restored by
//! `pipeline::run_ordered`.

use clap::Parser;

use kmcp_core::args::SearchArgs;
use kmcp_core::commands::run_search;

fn main() {
    env_logger::init();
    let args = SearchArgs::parse();
    if let Err(e) = run_search(args) {
        log::error!("{e}");
        std::process::exit(1);
    }
}
