mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use clausecheck::app::AppContext;
use clausecheck::config::Config;
use clausecheck::db::Db;
use clausecheck::mcp::server::McpServer;

use crate::cli::{Cli, Commands};

#[tokio::main]
async fn main() {
    init_tracing();

    if let Err(err) = run().await {
        error!(error = %err, "command failed");
        for cause in err.chain().skip(1) {
            error!(cause = %cause, "caused by");
        }
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            let ctx = AppContext::build(config).await?;
            McpServer::new(ctx).start().await
        }
        Commands::Reference(args) => {
            let ctx = AppContext::build(config).await?;
            let cfg = &ctx.config.reference;
            let source = args.source.unwrap_or_else(|| cfg.source_path.clone());
            let collection = ctx
                .reference
                .ensure(&source, &cfg.collection_name, args.force)
                .await?;
            info!(
                "Reference collection {} holds {} articles",
                collection.name(),
                collection.count().await?
            );
            Ok(())
        }
        Commands::Analyze(args) => {
            let ctx = AppContext::build(config).await?;
            let cancel = ctx.shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Interrupted, cancelling analysis");
                    cancel.cancel();
                }
            });
            let (id, report) = ctx
                .pipeline
                .run(&args.file, ctx.shutdown.child_token())
                .await
                .with_context(|| format!("analysis of {} failed", args.file.display()))?;
            info!("Contract {id} analysed");
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Commands::Status(args) => {
            let db = Db::open(&config.db_path, config.embedding.dimensions)
                .with_context(|| format!("failed to open database {}", config.db_path))?;
            let record = db
                .get_contract(&args.contract_id)?
                .with_context(|| format!("contract not found: {}", args.contract_id))?;
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(())
        }
        Commands::Search(args) => {
            let ctx = AppContext::build(config).await?;
            let collection = ctx
                .index
                .get_collection(&ctx.config.reference.collection_name)
                .await?;
            for hit in collection.query(&args.query, args.top_k).await? {
                println!("[{:.3}] {}", hit.similarity, hit.id);
                println!("{}\n", hit.text);
            }
            Ok(())
        }
        Commands::Chat(args) => {
            let ctx = AppContext::build(config).await?;
            let reply = ctx.chat.ask(&args.contract_id, &args.message).await?;
            println!("{reply}");
            Ok(())
        }
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
