use clap::Parser;
use code_session::{LanguageTable, PtyConfig, SessionConfig, SessionManager};
use code_session_server::{create_app, run_server};
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to listen on
    #[arg(short, long, default_value = "0.0.0.0:3000")]
    addr: SocketAddr,

    /// TOML file with language definitions added to the builtin ones
    #[arg(short, long)]
    languages: Option<PathBuf>,

    /// Directory to create run workspaces in (system temp dir by default)
    #[arg(long)]
    workspace_root: Option<PathBuf>,

    /// Language used when a run request names none
    #[arg(long, default_value = code_session::DEFAULT_LANGUAGE)]
    default_language: String,

    /// Terminal rows
    #[arg(long, default_value = "30")]
    rows: u16,

    /// Terminal columns
    #[arg(long, default_value = "80")]
    cols: u16,

    /// TERM value for spawned programs
    #[arg(long, default_value = "xterm-color")]
    term: String,
}

/// Filter used when `RUST_LOG` is unset or invalid
const DEFAULT_LOG_FILTER: &str = "info,tower_http=debug";

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();

    let mut languages = LanguageTable::builtin();
    if let Some(path) = &args.languages {
        let overrides = LanguageTable::load(path).await?;
        info!(
            "Loaded {} language definitions from {}",
            overrides.len(),
            path.display()
        );
        languages = languages.merge(overrides);
    }
    languages.resolve(&args.default_language)?;

    let mut config = SessionConfig::default()
        .with_default_language(args.default_language)
        .with_pty(PtyConfig {
            rows: args.rows,
            cols: args.cols,
            term: args.term,
        });
    if let Some(root) = args.workspace_root {
        tokio::fs::create_dir_all(&root).await?;
        config = config.with_workspace_root(root);
    }

    for status in languages.availability() {
        if !status.available {
            info!("{} is not available on this host", status.language);
        }
    }

    let manager = SessionManager::new(languages, config);
    let app = create_app(Arc::new(manager));
    run_server(app, args.addr).await?;

    Ok(())
}
