use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use trivia_client::config::ClientConfig;

mod client;
mod view;

#[derive(Parser)]
#[command(name = "trivia")]
#[command(about = "Play a trivia game as one team", long_about = None)]
struct Cli {
    /// Push channel URL (overrides the config file)
    #[arg(short, long)]
    server: Option<String>,

    /// Game service base URL (overrides the config file)
    #[arg(short, long)]
    api: Option<String>,

    /// Access token for the game service and push channel
    #[arg(long)]
    token: Option<String>,

    /// Team ID
    #[arg(short, long)]
    team: Option<u32>,

    /// Game to join (a new game is created when omitted)
    #[arg(short, long)]
    game: Option<String>,

    /// Session snapshot file
    #[arg(long)]
    state: Option<PathBuf>,

    /// JSON config file (defaults to $TRIVIA_CONFIG_PATH or config/client.json)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

impl Cli {
    fn into_config(self) -> (ClientConfig, Option<String>) {
        let mut config = match &self.config {
            Some(path) => ClientConfig::load_from(path),
            None => ClientConfig::load(),
        };
        if let Some(server) = self.server {
            config.ws_url = server;
        }
        if let Some(api) = self.api {
            config.api_url = api;
        }
        if let Some(token) = self.token {
            config.access_token = Some(token);
        }
        if let Some(team) = self.team {
            config.team_id = team;
        }
        if let Some(state) = self.state {
            config.state_path = state;
        }
        (config, self.game)
    }
}

#[tokio::main]
async fn main() {
    // Logs go to stderr so the stdout view stays readable.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let (config, game) = Cli::parse().into_config();
    if config.team_id == 0 {
        eprintln!("Error: a team ID is required (--team or team_id in the config file)");
        std::process::exit(2);
    }

    println!(
        "Team {} on {} ({})...",
        config.team_id, config.ws_url, config.api_url
    );

    if let Err(e) = client::start_client(config, game).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
