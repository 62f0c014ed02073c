use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;

use rune::cli::Cli;
use rune::event::{SystemControl, QUEUE_CAPACITY};
use rune::net::TelnetClient;
use rune::session::{BootConfig, Collaborators, Session};
use rune::ui::TerminalUi;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config_dir = cli.config_dir();

    // Keep the guard alive until the end so buffered log lines are flushed.
    let _log_guard = match rune::logging::init(&config_dir, cli.debug) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("rune: logging disabled: {e}");
            None
        }
    };

    let (net_tx, net_rx) = mpsc::channel(QUEUE_CAPACITY);
    let network = Arc::new(TelnetClient::new(net_tx));

    let (input_tx, input_rx) = mpsc::channel(QUEUE_CAPACITY);
    let (ui, display) = match TerminalUi::start(input_tx) {
        Ok(started) => started,
        Err(e) => {
            eprintln!("rune: cannot initialise terminal: {e}");
            return ExitCode::FAILURE;
        }
    };

    let session = Session::new(
        BootConfig::new(config_dir, cli.scripts),
        Collaborators {
            network,
            net_events: net_rx,
            display: Box::new(display),
            input: input_rx,
        },
    );
    if let Some(address) = cli.connect {
        session.request(SystemControl::Connect(address));
    }

    let result = session.run().await;
    ui.shutdown();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(target: "session", "{e}");
            eprintln!("rune: {e}");
            ExitCode::FAILURE
        }
    }
}
