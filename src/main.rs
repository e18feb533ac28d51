mod cli;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use contact_import::config::Config;
use contact_import::llm::LLM;
use contact_import::mapping::FieldMapping;
use contact_import::models::{AppState, Strategy};
use contact_import::orchestrator::{ContactBook, ImportSession};
use contact_import::poll::{poll_until_terminal, HttpStatusSource, PollConfig};
use contact_import::queue::{ImportWorker, JobQueue};
use contact_import::routes::create_router;
use contact_import::sandbox::provider_from_config;
use contact_import::utils::init_logger;

use crate::cli::{Cli, Commands, ImportArgs, ServeArgs, StatusArgs};

#[tokio::main]
async fn main() -> Result<()> {
    init_logger();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Commands::Serve(args) => serve(config, args).await,
        Commands::Import(args) => import(config, args).await,
        Commands::Status(args) => status(config, args).await,
    }
}

async fn serve(mut config: Config, args: ServeArgs) -> Result<()> {
    if let Some(port) = args.port {
        config.server.port = port;
    }
    info!("Configuration loaded: {:?}", config.server);

    let llm = LLM::from_config(&config.llm).context("Failed to configure the LLM provider")?;
    let sandbox = provider_from_config(&config.sandbox).context("Failed to configure the sandbox")?;
    let state = AppState::new(config.clone(), Arc::new(llm), sandbox);

    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid HOST/PORT")?;
    info!("Server listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    Ok(())
}

async fn import(config: Config, args: ImportArgs) -> Result<()> {
    let text = tokio::fs::read_to_string(&args.file)
        .await
        .with_context(|| format!("Failed to read {}", args.file.display()))?;
    let file_name = args
        .file
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default()
        .to_string();

    let mut session = ImportSession::new(args.strategy);
    session.set_ranking_criteria(args.ranking_criteria)?;
    session.select_file(&file_name, &text)?;

    match args.strategy {
        Strategy::Manual => {
            let mapping: FieldMapping = args.map.into_iter().collect();
            session
                .apply_mapping(&mapping)
                .context("Manual imports need --map for fullName and email")?;
        }
        Strategy::Inference => {
            let llm = LLM::from_config(&config.llm)?;
            session.resolve_with_inference(&llm).await?;
        }
        Strategy::Agentic => {
            let llm = Arc::new(LLM::from_config(&config.llm)?);
            let sandbox = provider_from_config(&config.sandbox)?;
            let jobs = JobQueue::new(ImportWorker::new(llm, sandbox, config.agent.max_iterations));

            let canceller = session.canceller();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted, cancelling import");
                    canceller.cancel();
                }
            });

            session
                .resolve_with_agent(&jobs, &PollConfig::from(&config.poll))
                .await?;
        }
    }

    let book = ContactBook::new();
    session.confirm(|contacts| book.merge(contacts))?.await;
    println!("{}", serde_json::to_string_pretty(&book.list().await)?);

    Ok(())
}

async fn status(config: Config, args: StatusArgs) -> Result<()> {
    let base_url = args.base_url.unwrap_or(config.jobs.base_url);
    let source = HttpStatusSource::new(&base_url, config.jobs.signing_key);

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel_tx.send_replace(true);
        }
    });

    let run = poll_until_terminal(&source, &args.event_id, &PollConfig::from(&config.poll), cancel_rx)
        .await
        .with_context(|| format!("Waiting for event {}", args.event_id))?;
    println!("{}", serde_json::to_string_pretty(&run)?);

    Ok(())
}
