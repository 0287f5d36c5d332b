//! Command line access to the VM set store.
//!
//! `vmsetctl` parses node provider IDs and answers node queries against a JSON snapshot of the
//! compute resources of a subscription, using the same caches and lookup paths as a controller
//! would.

#![warn(missing_debug_implementations, clippy::all)]

mod cli;
mod logging;
mod output;

fn main() {
    match cli::execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}
