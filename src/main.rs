use serenity::all::{ClientBuilder, GatewayIntents};
use serenity::http::Http;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use warden::clock::SystemClock;
use warden::db::Database;
use warden::discord::Handler;
use warden::{commands, config::Config, sweeper, Data};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load configuration
    let config = Config::from_env()?;
    info!("Loaded configuration: {:?}", config);
    let discord_token = config.discord_token.clone();

    let db = Database::new(&config)?;
    db.execute_init()?;

    let registry = commands::builtin()?;
    info!("Registered {} commands", registry.len());

    let bot_id = Http::new(&discord_token)
        .get_current_user()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to fetch bot user: {}", e))?
        .id
        .get();

    let data = Arc::new(Data::new(config, db, Arc::new(SystemClock), registry, bot_id));
    data.sessions.restore().await?;

    tokio::spawn(sweeper::start_session_sweep(data.clone()));
    tokio::spawn(sweeper::start_usage_purge(data.clone()));

    let intents = GatewayIntents::non_privileged()
        | GatewayIntents::MESSAGE_CONTENT
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::DIRECT_MESSAGES
        | GatewayIntents::GUILD_MEMBERS;

    let mut client = ClientBuilder::new(&discord_token, intents)
        .event_handler(Handler::new(data))
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create client: {}", e))?;

    info!("Starting bot...");
    if let Err(why) = client.start().await {
        error!("Client error: {:?}", why);
    }

    Ok(())
}
