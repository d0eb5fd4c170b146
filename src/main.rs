mod config;
mod coordinator;
mod http_server;
mod logging;
mod models;
mod ports;
mod services;
mod shutdown;
mod slack;
mod spotify_rs;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::{Result, eyre::Context};
use tokio_util::sync::CancellationToken;

use crate::{
    config::{Config, ExtractionStrategy},
    coordinator::{PipelineSettings, run_pipeline},
    logging::init_tracing,
    services::{authorization::PendingAuthorization, extractor::HostMatching},
    shutdown::cancel_on_signal,
    slack::SocketModeClient,
    spotify_rs::auth::SpotifyAuthenticator,
};

const SERVICE_NAME: &str = "slack-playlist-maker";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// The config file to use
    #[arg(short, long, global = true, env = "SLACK_PLAYLIST_MAKER_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter directive, e.g. `info` or `slack_playlist_maker=debug`
    #[arg(long, default_value = "info", global = true, env = "LOG_LEVEL")]
    log_level: String,

    /// OTLP gRPC endpoint to export spans to
    #[arg(long, global = true, env = "OTLP_ENDPOINT")]
    otlp_endpoint: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch Slack for Spotify tracks and add them to the playlist
    Serve(ServeArgs),
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(clap::Args, Debug)]
struct ServeArgs {
    /// Address the OAuth callback server listens on (`:8080` binds every interface)
    #[arg(long, env = "LISTEN_ADDR")]
    listen_addr: Option<String>,

    /// Slack app-level token (xapp-...)
    #[arg(long, env = "SLACK_TOKEN", hide_env_values = true)]
    slack_token: String,

    /// Spotify client id
    #[arg(long, env = "SPOTIFY_ID")]
    spotify_id: String,

    /// Spotify client secret
    #[arg(long, env = "SPOTIFY_SECRET", hide_env_values = true)]
    spotify_secret: String,

    /// Redirect URI registered with the Spotify app
    #[arg(long, env = "SPOTIFY_REDIRECT_URI")]
    spotify_redirect_uri: Option<String>,

    /// Playlist to add tracks to, it has to be public
    #[arg(long, env = "SPOTIFY_PLAYLIST_ID")]
    spotify_playlist_id: Option<String>,

    /// Where to look for tracks in a message
    #[arg(long, value_enum, env = "EXTRACTION_STRATEGY")]
    extraction: Option<ExtractionStrategy>,

    /// Whether link hosts have to belong to the Spotify domain
    #[arg(long, value_enum, env = "HOST_MATCHING")]
    host_matching: Option<HostMatching>,
}

impl ServeArgs {
    /// Flags and environment take precedence over the config file.
    fn apply(self, config: &mut Config) {
        if let Some(listen_addr) = self.listen_addr {
            config.listen_addr = listen_addr;
        }
        if let Some(redirect_uri) = self.spotify_redirect_uri {
            config.spotify.redirect_uri = redirect_uri;
        }
        if let Some(playlist_id) = self.spotify_playlist_id {
            config.spotify.playlist_id = Some(playlist_id);
        }
        if let Some(strategy) = self.extraction {
            config.extraction.strategy = strategy;
        }
        if let Some(host_matching) = self.host_matching {
            config.extraction.host_matching = host_matching;
        }
        config.slack.token = Some(self.slack_token);
        config.spotify.client_id = Some(self.spotify_id);
        config.spotify.client_secret = Some(self.spotify_secret);
    }
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Create a default config file, if it doesn't exist
    CreateDefault,
    /// Print the path to the config file
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    let tracer_provider = init_tracing(SERVICE_NAME, args.otlp_endpoint.as_deref(), &args.log_level)?;

    let result = run(args).await;

    if let Some(tracer_provider) = tracer_provider {
        if let Err(e) = tracer_provider.shutdown() {
            eprintln!("Failed to shut down tracer provider: {}", e);
        }
    }

    result
}

async fn run(args: Args) -> Result<()> {
    match args.command {
        Commands::Config(config_commands) => match config_commands {
            ConfigCommands::CreateDefault => {
                let path = Config::create_default()?;
                tracing::info!("Default config at {}", path.display());
            }
            ConfigCommands::Path => match Config::config_path() {
                Some(path) => println!("{}", path.display()),
                None => println!("No default config path found"),
            },
        },
        Commands::Serve(serve_args) => {
            tracing::debug!("Loading configuration");
            let mut config = match &args.config {
                Some(path) => Config::from_file(path),
                None => Config::load(),
            }
            .wrap_err("Failed to load slack-playlist-maker config")?;
            serve_args.apply(&mut config);
            config.validate().wrap_err("Invalid configuration")?;

            serve(config).await?;
        }
    }

    Ok(())
}

async fn serve(config: Config) -> Result<()> {
    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    let authenticator = SpotifyAuthenticator::new(config.spotify_credentials()?);
    let authorization = PendingAuthorization::start(
        authenticator,
        &config.listen_socket_address(),
        &config.callback_path()?,
    )
    .await?;

    let chat_events = SocketModeClient::new(config.slack_token()?, config.reconnect_delay())
        .spawn(cancel.clone());

    let settings = PipelineSettings {
        playlist_id: config.playlist_id()?.to_string(),
        track_queue_capacity: config.track_queue_capacity,
    };
    tracing::info!(
        playlist_id = %settings.playlist_id,
        strategy = ?config.extraction.strategy,
        "Starting slack-playlist-maker"
    );

    run_pipeline(
        settings,
        chat_events,
        config.build_extractor(),
        authorization,
        cancel,
    )
    .await
    .wrap_err("slack-playlist-maker stopped")?;

    tracing::info!("Shut down cleanly");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }

    #[test]
    fn test_serve_flags_override_file() {
        let args = Args::try_parse_from([
            "slack-playlist-maker",
            "serve",
            "--listen-addr",
            ":9000",
            "--slack-token",
            "xapp-1",
            "--spotify-id",
            "id",
            "--spotify-secret",
            "secret",
            "--spotify-playlist-id",
            "office",
            "--extraction",
            "attachments",
            "--host-matching",
            "path-only",
        ])
        .unwrap();
        let Commands::Serve(serve_args) = args.command else {
            panic!("expected serve");
        };

        let mut config = Config::default();
        config.spotify.playlist_id = Some("from-file".into());
        serve_args.apply(&mut config);

        tokio_test::assert_ok!(config.validate());
        assert_eq!(config.listen_socket_address(), "0.0.0.0:9000");
        assert_eq!(config.playlist_id().unwrap(), "office");
        assert_eq!(config.extraction.strategy, ExtractionStrategy::Attachments);
        assert_eq!(config.extraction.host_matching, HostMatching::PathOnly);
        assert_eq!(config.slack_token().unwrap(), "xapp-1");
    }
}
