use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, fmt};

use opsagent::agent::{Agent, DEFAULT_MAX_ITERATIONS};
use opsagent::cli::{Cli, parse_mcp_spec};
use opsagent::config::{AppConfig, DEFAULT_MODEL, DEFAULT_OLLAMA_URL, DEFAULT_QDRANT_URL};
use opsagent::model::OllamaClient;
use opsagent::rag::{Indexer, IndexerConfig};
use opsagent::repl;
use opsagent::tooling::{McpTool, ShellTool, SshTool, Tool, WikiTool};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    debug!(?cli, "CLI arguments parsed");
    let file_config = AppConfig::load(cli.config.as_deref().map(Path::new))?;

    let model = cli
        .model
        .or(file_config.model)
        .unwrap_or_else(|| DEFAULT_MODEL.to_string());
    let max_iter = cli
        .max_iter
        .or(file_config.max_iter)
        .unwrap_or(DEFAULT_MAX_ITERATIONS);
    let ollama_url = cli
        .ollama_url
        .or(file_config.ollama_url)
        .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());
    let qdrant_url = cli
        .qdrant
        .or(file_config.qdrant_url)
        .unwrap_or_else(|| DEFAULT_QDRANT_URL.to_string());
    let wiki_path = cli.wiki.or(file_config.wiki_path);
    let mcp_specs = if cli.mcp.is_empty() {
        file_config.mcp
    } else {
        cli.mcp
    };

    println!("opsagent (model: {model})");

    let mut tools: Vec<Arc<dyn Tool>> = vec![Arc::new(SshTool), Arc::new(ShellTool::new())];

    for (index, spec) in mcp_specs.iter().enumerate() {
        let (name, target) = parse_mcp_spec(spec, index);
        let mcp = McpTool::connect(name.clone(), &target)
            .await
            .map_err(|err| format!("failed to connect to MCP server \"{name}\": {err}"))?;
        println!(
            "MCP server \"{name}\" connected ({} tools discovered)",
            mcp.tool_count()
        );
        tools.push(Arc::new(mcp));
    }

    if let Some(wiki_path) = wiki_path {
        let wiki_path = PathBuf::from(shellexpand::tilde(&wiki_path).to_string());
        let indexer = Indexer::new(IndexerConfig {
            wiki_path: wiki_path.clone(),
            ollama_url: ollama_url.clone(),
            qdrant_url,
            ..IndexerConfig::default()
        });

        info!(path = %wiki_path.display(), "indexing wiki");
        println!("Indexing wiki from: {}", wiki_path.display());
        if let Err(err) = indexer.index().await {
            release_all(&tools).await;
            return Err(format!("failed to index wiki: {err}").into());
        }

        if cli.index_only {
            println!("Indexing complete. Exiting.");
            release_all(&tools).await;
            return Ok(());
        }

        tools.push(Arc::new(WikiTool::new(indexer.embeddings(), indexer.store())));
        println!("Wiki tool enabled.");
    }

    println!("Type /help for commands");
    println!("---");

    let client = Arc::new(OllamaClient::new(ollama_url, model));
    let mut agent = Agent::new(client, tools, max_iter);

    repl::run(&mut agent).await?;
    Ok(())
}

async fn release_all(tools: &[Arc<dyn Tool>]) {
    for tool in tools {
        tool.release().await;
    }
}

fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_level(true)
            .init();
    });
}
