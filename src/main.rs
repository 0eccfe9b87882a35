mod cli;

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};

use reelcast_core::config::Config;
use reelcast_server::registry::VideoRegistry;

fn load_config(path: Option<&Path>) -> Result<Config> {
    Config::load_or_default(path).context("failed to load configuration")
}

async fn serve(
    config_path: Option<&Path>,
    listen: Option<String>,
    video_dir: Option<std::path::PathBuf>,
) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(listen) = listen {
        config.server.listen = listen;
    }
    if let Some(dir) = video_dir {
        config.library.video_dir = dir;
    }

    tracing::info!("Starting reelcast {}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        "Serving {} on {}",
        config.library.video_dir.display(),
        config.server.listen
    );

    reelcast_server::start(config).await?;
    Ok(())
}

fn list_videos(config_path: Option<&Path>, json: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let registry = VideoRegistry::new(&config.library);
    registry
        .rescan()
        .with_context(|| format!("failed to scan {}", config.library.video_dir.display()))?;
    let videos = registry.list();

    if json {
        println!("{}", serde_json::to_string_pretty(&videos)?);
        return Ok(());
    }

    if videos.is_empty() {
        println!("No videos in {}", config.library.video_dir.display());
        return Ok(());
    }
    for video in &videos {
        println!("{}  {:>12}  {}", video.id, video.size, video.display_name);
    }
    println!("{} videos", videos.len());
    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {}", p.display());
            Config::load(p)?
        }
        None => {
            println!("No config file specified, using defaults");
            let config = Config::default();
            config.validate()?;
            config
        }
    };

    println!("✓ Configuration is valid");
    println!("  Listen: {}", config.server.listen);
    println!("  Max connections: {}", config.server.max_connections);
    println!("  Video dir: {}", config.library.video_dir.display());
    println!("  Chunk size: {} bytes", config.streaming.chunk_size);
    println!("  Prefetch size: {} bytes", config.streaming.prefetch_size);
    println!(
        "  Rate limit: {} bytes/s",
        config.streaming.rate_limit_bytes_per_sec
    );
    println!("  Thumbnails: {}", config.thumbnails.dir.display());
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG if set, otherwise pick defaults from the verbose flag.
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "reelcast=trace,reelcast_server=trace,reelcast_core=trace".to_string()
        } else {
            "reelcast=info,reelcast_server=info,reelcast_core=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Serve { listen, video_dir } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(serve(cli.config.as_deref(), listen, video_dir))
        }
        Commands::List { json } => list_videos(cli.config.as_deref(), json),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("reelcast {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
