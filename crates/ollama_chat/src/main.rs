use std::io;
use std::process::ExitCode;
use std::time::Duration;

use ollama_chat::config::Config;
use ollama_chat::repl::{self, ReplSession};
use ollama_chat::{logging, providers};
use tracing::info;

fn main() -> ExitCode {
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(error) => {
            eprintln!("failed to start async runtime: {error}");
            return ExitCode::FAILURE;
        }
    };

    let outcome = runtime.block_on(run());
    // The stdin reader sits in a blocking read; don't wait for another line.
    runtime.shutdown_timeout(Duration::from_millis(200));

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("{error}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> io::Result<()> {
    let config = Config::load(None).map_err(io::Error::other)?;
    logging::init(&config.logging).map_err(io::Error::other)?;
    info!(
        event = "app.start",
        backend = %config.ollama.backend,
        host = %config.ollama.host,
        model = %config.ollama.model
    );

    let backend = providers::backend_from_config(&config.ollama).map_err(io::Error::other)?;
    let (lines, reader) = repl::spawn_stdin_reader();
    let mut session = ReplSession::new(config, backend, lines).map_err(io::Error::other)?;

    session.startup().await;
    session.run().await;

    reader.abort();
    info!(event = "app.exit");
    Ok(())
}
