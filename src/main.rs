//! contractctl - contract store CLI tool
//!
//! A command-line interface for inspecting and curating the collection
//! contracts the indexer watches.

use sieve::cli;

fn main() {
    if let Err(e) = cli::run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
