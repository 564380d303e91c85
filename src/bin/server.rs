//! Parley chat server binary.
//! Run with: cargo run --bin parley-server

use std::process::ExitCode;

use parley_chat::start_parley;

fn main() -> ExitCode {
    start_parley::run()
}
