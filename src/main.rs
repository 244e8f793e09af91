//! mintbot binary: wires configuration, services and a delivery surface.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use mintbot::bot::{BOT_COMMANDS, Bot, BotDeps};
use mintbot::channels::{Channel, ReplChannel, TelegramChannel, start_health_server};
use mintbot::config::{Config, TelegramConfig};
use mintbot::services::{
    ConversationalAgent, HttpImageFetcher, MetadataPinner, OpenAiImageGenerator, OpenAiToolAgent,
    PinataClient, PrivyWalletService, SolanaToolkit, SupabaseClient, SupabaseImageStore,
    SupabaseUserStore, WalletService,
};

#[derive(Parser, Debug)]
#[command(
    name = "mintbot",
    version,
    about = "Telegram bot for image generation, Solana wallets and NFT minting"
)]
struct Cli {
    /// TOML config overlay (default: ~/.mintbot/config.toml).
    #[arg(long, global = true, env = "MINTBOT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// Run the Telegram bot and the health listener (default).
    Run,
    /// Talk to the bot from the terminal. `@n` presses button n.
    Repl {
        /// Send a single message and exit.
        #[arg(short, long)]
        message: Option<String>,
    },
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mintbot=info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().with_target(false)).init();
    }
}

fn build_bot(config: &Config) -> Bot {
    let supabase = SupabaseClient::new(&config.supabase);
    let store = Arc::new(SupabaseImageStore::new(
        supabase.clone(),
        config.supabase.images_bucket.clone(),
    ));
    let wallets: Arc<dyn WalletService> = Arc::new(PrivyWalletService::new(
        config.privy.clone(),
        SupabaseUserStore::new(supabase),
    ));

    let toolkit = Arc::new(SolanaToolkit::new(&config.solana));
    let agent = Arc::new(OpenAiToolAgent::new(
        &config.openai,
        toolkit,
        Arc::clone(&wallets),
    ));
    tracing::info!(
        capabilities = ?agent.capabilities().iter().map(|c| c.as_str()).collect::<Vec<_>>(),
        model = %config.openai.chat_model,
        "Agent ready"
    );

    let pinata = PinataClient::new(&config.pinata);
    let pinner: Option<Arc<dyn MetadataPinner>> = if pinata.is_configured() {
        Some(Arc::new(pinata))
    } else {
        None
    };

    Bot::new(
        BotDeps {
            images: Arc::new(OpenAiImageGenerator::new(&config.openai)),
            store,
            wallets,
            agent,
            fetcher: Arc::new(HttpImageFetcher::new()),
            pinner,
        },
        config.bot.clone(),
    )
}

async fn run_telegram(bot: Arc<Bot>, config: &Config) -> anyhow::Result<()> {
    let telegram = config
        .channels
        .telegram
        .as_ref()
        .ok_or_else(TelegramConfig::missing)?;

    let health = &config.channels.health;
    let addr: SocketAddr = format!("{}:{}", health.host, health.port)
        .parse()
        .with_context(|| format!("invalid health listener address {}:{}", health.host, health.port))?;
    let health_server = start_health_server(addr).await?;
    tracing::info!(addr = %health_server.addr, "Health listener started");

    let channel = TelegramChannel::new(telegram)?.with_commands(BOT_COMMANDS);
    channel
        .health_check()
        .await
        .context("Telegram bot API is unreachable; check TELEGRAM_BOT_TOKEN")?;
    let result = bot.run(Arc::new(channel)).await;

    health_server.shutdown();
    result?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load .env files before tracing so RUST_LOG and LOG_FORMAT can live there.
    let _ = dotenvy::dotenv();
    mintbot::bootstrap::load_mintbot_env();
    init_tracing();

    let config = Config::from_env_with_toml(cli.config.as_deref())
        .context("failed to load configuration")?;
    let bot = Arc::new(build_bot(&config));

    match cli.command.unwrap_or(CliCommand::Run) {
        CliCommand::Run => run_telegram(bot, &config).await,
        CliCommand::Repl { message } => {
            let channel: Arc<dyn Channel> = Arc::new(match message {
                Some(message) => ReplChannel::with_message(message),
                None => ReplChannel::new(),
            });
            bot.run(channel).await?;
            Ok(())
        }
    }
}
