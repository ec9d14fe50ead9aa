use anyhow::Result;
use clap::{Parser, Subcommand};
use quotagate::config::Config;
use quotagate::server::Server;
use tracing::info;

#[derive(Parser)]
#[command(name = "quotagate")]
#[command(about = "QuotaGate - distributed rate limiter for a notification-sending API surface")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the QuotaGate server
    Serve {
        /// Configuration file path
        #[arg(short, long, default_value = "quotagate.toml")]
        config: String,
        /// Bind address
        #[arg(short, long)]
        bind: Option<String>,
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Validate configuration without starting the server
    Check {
        /// Configuration file path
        #[arg(short, long, default_value = "quotagate.toml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    quotagate::init_tracing();
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, bind, port } => {
            info!("starting QuotaGate v{}", env!("CARGO_PKG_VERSION"));

            let mut cfg = Config::load(&config).await?;
            if let Some(bind_addr) = bind {
                cfg.server.bind = bind_addr;
            }
            if let Some(port_num) = port {
                cfg.server.port = port_num;
            }

            let server = Server::new(cfg).await?;
            server.start().await?;
        }
        Commands::Check { config } => {
            let cfg = Config::load(&config).await?;
            info!(
                bind = %cfg.server.bind,
                port = cfg.server.port,
                db = %cfg.storage.db,
                redis = %cfg.storage.redis,
                "configuration loaded and validated"
            );
        }
    }

    Ok(())
}
