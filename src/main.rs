use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use horarios::{Config, Overrides, app, load_env_file};

/// UNIBAVE schedule management web server
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Address to listen on (overrides HORARIOS_BIND)
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Externally visible URL used in sign-in links (overrides HORARIOS_SITE_URL)
    #[arg(long)]
    site_url: Option<String>,

    /// Directory served under /static (overrides HORARIOS_STATIC_DIR)
    #[arg(long)]
    static_dir: Option<PathBuf>,

    /// Environment file to load before reading settings
    #[arg(long, default_value = ".env")]
    env_file: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    load_env_file(&args.env_file)?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from_env(Overrides {
        bind: args.bind,
        site_url: args.site_url,
        static_dir: args.static_dir,
    })?;

    log::info!(
        "Starting web server for backend {} (logos in bucket {})",
        config.backend_url,
        config.logo_bucket
    );
    app::run(config).await
}
