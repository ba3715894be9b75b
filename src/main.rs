mod app;
mod cli;
mod config;
mod fetch;
mod logging;
mod replace;
mod ui;

use anyhow::Result;

fn main() -> Result<()> {
    if let Err(err) = logging::init() {
        eprintln!("Logging disabled: {err:#}");
    }
    cli::run()
}
