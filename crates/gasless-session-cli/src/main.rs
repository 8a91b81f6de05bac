//! Gasless Session CLI
//!
//! Command-line driver for the session engine against the simulated bundler.
//! Sessions live in memory unless `--store-dir` points at a sealed file store.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use gasless_session_core::{
    Address, ChainId, EngineConfig, FileSessionStore, MemorySessionStore, OwnerId, ProviderId,
    SessionEngine, SessionStore,
    config::{DEMO_COLLECTIBLE_CONTRACT, DEMO_TOKEN_CONTRACT, TRANSFER_SELECTOR},
    provider::SimulatedBundler,
    types::{parse_address, parse_amount, parse_selector},
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "gasless-session")]
#[command(about = "Session keys and spending limits for sponsored smart accounts", version)]
struct Cli {
    /// Engine configuration file (JSON)
    #[arg(long, env = "GASLESS_CONFIG")]
    config: Option<PathBuf>,

    /// Active provider (zerodev, biconomy, alchemy)
    #[arg(long, env = "GASLESS_PROVIDER")]
    provider: Option<ProviderId>,

    /// Active chain id
    #[arg(long, env = "GASLESS_CHAIN_ID")]
    chain_id: Option<u64>,

    /// Directory for sealed session records
    #[arg(long, env = "GASLESS_STORE_DIR", requires = "store_key")]
    store_dir: Option<PathBuf>,

    /// Hex-encoded 32-byte sealing key for the session store
    #[arg(long, env = "GASLESS_STORE_KEY", hide_env_values = true)]
    store_key: Option<String>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show engine configuration and providers
    Info,

    /// Derive an owner's smart account address
    Address {
        /// Owner identity
        #[arg(short, long)]
        owner: String,

        /// Derive under every provider instead of the active one
        #[arg(long)]
        all: bool,
    },

    /// Manage session keys
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },

    /// Spend through an owner's session
    Spend {
        /// Owner identity
        #[arg(short, long)]
        owner: String,

        /// Target contract
        #[arg(short, long)]
        target: String,

        /// Amount in base units
        #[arg(short, long)]
        amount: String,

        /// Method selector (0x-prefixed, 4 bytes)
        #[arg(short, long, default_value = "0xa9059cbb")]
        selector: String,
    },

    /// Run the full lifecycle against an in-memory store
    Demo {
        /// Owner identity
        #[arg(short, long, default_value = "demo@example.com")]
        owner: String,
    },
}

#[derive(Subcommand)]
enum SessionAction {
    /// Create a session, or show the active one
    Create {
        #[arg(short, long)]
        owner: String,
    },
    /// Show the active session
    Get {
        #[arg(short, long)]
        owner: String,
    },
    /// Revoke the session
    Revoke {
        #[arg(short, long)]
        owner: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(&cli)?;

    match cli.command {
        Commands::Info => show_info(&config),
        Commands::Address { ref owner, all } => {
            let engine = build_engine(&cli, config)?;
            derive_addresses(&engine, &OwnerId::new(owner.as_str()), all).await?;
        }
        Commands::Session { ref action } => {
            let engine = build_engine(&cli, config)?;
            run_session_action(&engine, action).await?;
        }
        Commands::Spend {
            ref owner,
            ref target,
            ref amount,
            ref selector,
        } => {
            // Parse everything before touching the engine
            let target = parse_address(target)?;
            let amount = parse_amount(amount)?;
            let selector = parse_selector(selector)?;

            let engine = build_engine(&cli, config)?;
            spend(&engine, &OwnerId::new(owner.as_str()), target, amount, selector).await?;
        }
        Commands::Demo { ref owner } => {
            run_demo(config, &OwnerId::new(owner.as_str())).await?;
        }
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            EngineConfig::from_json(&json)?
        }
        None => EngineConfig::default(),
    };

    if let Some(provider) = cli.provider {
        config = config.with_provider(provider);
    }
    if let Some(chain_id) = cli.chain_id {
        config = config.with_chain(ChainId(chain_id));
    }
    config.validate()?;
    Ok(config)
}

fn build_engine(cli: &Cli, config: EngineConfig) -> Result<SessionEngine> {
    let store: Arc<dyn SessionStore> = match (&cli.store_dir, &cli.store_key) {
        (Some(dir), Some(key)) => Arc::new(FileSessionStore::new(dir, parse_store_key(key)?)?),
        (Some(_), None) => bail!("--store-dir requires --store-key"),
        _ => Arc::new(MemorySessionStore::new()),
    };

    Ok(SessionEngine::new(
        config,
        store,
        Arc::new(SimulatedBundler::new()),
    )?)
}

fn parse_store_key(key: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(key.strip_prefix("0x").unwrap_or(key)).context("store key is not hex")?;
    bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("store key must be 32 bytes"))
}

fn show_info(config: &EngineConfig) {
    println!("Gasless Session Engine v{}", gasless_session_core::VERSION);
    println!();
    println!("Configuration:");
    println!("  Provider: {}", config.active_provider);
    println!("  Chain: {} ({})", config.chain_id, config.chain_id.name());
    println!("  Session TTL: {}s", config.session_ttl_secs);
    println!("  Daily limit: {}", config.default_spending_limit);
    println!("  Registration policy: {:?}", config.registration_policy);
    println!("  Entry point: {}", config.sponsorship.entry_point);
    match config.sponsorship.paymaster {
        Some(paymaster) => println!("  Paymaster: {}", paymaster),
        None => println!("  Paymaster: none (self-funded)"),
    }
    println!();
    println!("Allowed contracts:");
    for contract in &config.default_allowed_contracts {
        println!("  - {}", contract);
    }
    println!("Allowed selectors:");
    for selector in &config.default_allowed_selectors {
        println!("  - 0x{}", hex::encode(selector));
    }
    println!();
    println!("Providers:");
    for provider in ProviderId::all() {
        println!("  - {}", provider);
    }
}

async fn derive_addresses(engine: &SessionEngine, owner: &OwnerId, all: bool) -> Result<()> {
    if !all {
        let account = engine.account(owner).await?;
        println!("{}", serde_json::to_string_pretty(&account)?);
        return Ok(());
    }

    let chain = engine.config().chain_id;
    let mut output = serde_json::Map::new();
    for provider in ProviderId::all() {
        let address = engine.derive_address(owner, chain, provider)?;
        output.insert(provider.to_string(), serde_json::json!(address));
    }
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn run_session_action(engine: &SessionEngine, action: &SessionAction) -> Result<()> {
    match action {
        SessionAction::Create { owner } => {
            let handle = engine.create_session(&OwnerId::new(owner.as_str())).await?;
            println!("{}", serde_json::to_string_pretty(&handle)?);
        }
        SessionAction::Get { owner } => {
            match engine.get_session(&OwnerId::new(owner.as_str())).await? {
                Some(handle) => println!("{}", serde_json::to_string_pretty(&handle)?),
                None => println!("No active session for {}", owner),
            }
        }
        SessionAction::Revoke { owner } => {
            engine.revoke_session(&OwnerId::new(owner.as_str())).await?;
            println!("Session revoked for {}", owner);
        }
    }
    Ok(())
}

async fn spend(
    engine: &SessionEngine,
    owner: &OwnerId,
    target: Address,
    amount: u128,
    selector: [u8; 4],
) -> Result<()> {
    let mut call_data = selector.to_vec();
    call_data.extend_from_slice(&[0u8; 64]);

    let tx = engine.execute(owner, target, amount, &call_data).await?;
    println!("Submitted: {}", tx);
    Ok(())
}

async fn run_demo(config: EngineConfig, owner: &OwnerId) -> Result<()> {
    let limit = config.default_spending_limit;
    let engine = SessionEngine::new(
        config,
        Arc::new(MemorySessionStore::new()),
        Arc::new(SimulatedBundler::new()),
    )?;
    let mut events = engine.subscribe();

    let account = engine.account(owner).await?;
    println!("Account: {} ({})", account.address, account.provider_id);

    let session = engine.create_session(owner).await?;
    println!(
        "Session key: {} (expires {})",
        session.public_address, session.expiration
    );

    let mut transfer = TRANSFER_SELECTOR.to_vec();
    transfer.extend_from_slice(&[0u8; 64]);

    let first = limit / 2;
    let tx = engine
        .execute(owner, DEMO_TOKEN_CONTRACT, first, &transfer)
        .await?;
    println!("Spent {}: {}", first, tx);

    match engine
        .execute(owner, DEMO_TOKEN_CONTRACT, limit, &transfer)
        .await
    {
        Ok(tx) => println!("Unexpectedly accepted: {}", tx),
        Err(e) => println!("Denied: {}", e),
    }

    match engine
        .execute(owner, DEMO_COLLECTIBLE_CONTRACT, 1, &[0xde, 0xad, 0xbe, 0xef])
        .await
    {
        Ok(tx) => println!("Unexpectedly accepted: {}", tx),
        Err(e) => println!("Denied: {}", e),
    }

    engine.revoke_session(owner).await?;
    info!("Demo complete");

    println!();
    println!("Events:");
    while let Ok(envelope) = events.try_recv() {
        println!("  {}", serde_json::to_string(&envelope)?);
    }
    Ok(())
}
