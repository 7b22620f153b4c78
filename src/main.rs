use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use miette::{IntoDiagnostic, Result};
use tracing_subscriber::{fmt, EnvFilter};
use warden::*;

#[derive(Parser, Debug)]
#[command(
    name = "warden",
    version,
    about = "Permissions service fronting a ReBAC relation engine"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Parser, Debug)]
enum Command {
    /// Compile the policy document and print the relation-engine schema
    Schema {
        /// Policy document path (defaults to the configured one)
        #[arg(short, long)]
        policy: Option<PathBuf>,

        /// Schema namespace (defaults to the configured one)
        #[arg(short, long)]
        namespace: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    let settings = settings::Settings::load(&cli.config)?;
    tracing::info!(?settings, "loaded configuration");

    if let Some(Command::Schema { policy, namespace }) = cli.command {
        let path = policy.unwrap_or_else(|| settings.spicedb.policy_file.clone());
        let doc = iapl::loader::load_policy_document(&path).into_diagnostic()?;
        let compiled = iapl::Policy::compile(doc).into_diagnostic()?;

        let namespace = namespace.unwrap_or_else(|| settings.spicedb.namespace.clone());
        let schema =
            spicedb::generate_schema(&namespace, compiled.resource_types()).into_diagnostic()?;
        print!("{schema}");

        return Ok(());
    }

    // compile the policy before anything touches the network
    let doc = iapl::loader::load_policy_document(&settings.spicedb.policy_file).into_diagnostic()?;
    let policy = iapl::Policy::compile(doc).into_diagnostic()?;

    let store = storage::Storage::init(&settings.database)
        .await
        .into_diagnostic()?;

    // The in-process relation engine keeps development setups self-contained;
    // production deployments point this at a SpiceDB transport instead.
    let client = Arc::new(spicedb::MemoryRelationEngine::new());

    let engine = query::Engine::new(
        settings.spicedb.namespace.clone(),
        policy,
        client,
        store,
        Duration::from_millis(settings.spicedb.call_timeout_ms),
    );

    api::serve(&settings, Arc::new(engine)).await
}
