use anyhow::Context;
use tracing::{debug, error};

use gales_api::app::{launch, Config};
use gales_api::logging;

fn main() {
    logging::init();
    match run() {
        Ok(()) => return,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("{:#}", e);
            std::process::exit(1);
        }
    }
}

fn run() -> anyhow::Result<()> {
    if let Err(e) = dotenv::dotenv() {
        debug!("no .env loaded: {}", e);
    }
    let config = Config::from_env()
        .context("failed to read Config from environment (GALES_INPUT_DIR, GALES_FASTA_FILE, GALES_PORT)")?;
    launch(config)
}
