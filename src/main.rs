//! S3Desk - File Manager Gateway for S3 Buckets
//!
//! Serves the browser file manager API in front of a single bucket.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use s3desk::api::{AppState, HttpServer};
use s3desk::auth;
use s3desk::config::{CredentialSource, LoggingConfig, S3DeskConfig, StorageBackend};
use s3desk::error::Result;
use s3desk::manager::FileManager;
use s3desk::storage;

/// S3Desk - File Manager Gateway for S3 Buckets
#[derive(Parser)]
#[command(name = "s3desk")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "s3desk.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error), overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve,

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "s3desk.toml")]
        output: PathBuf,

        /// Bucket to serve
        #[arg(long, default_value = "my-s3-file-manager")]
        bucket: String,
    },

    /// Validate configuration file
    Validate,

    /// Print the hashed form of a password for the credential secret
    HashPassword {
        /// Plaintext password
        password: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // A broken config still gets logging; `validate` and `serve` report the error
    let mut logging = S3DeskConfig::from_file(&cli.config)
        .map(|config| config.logging)
        .unwrap_or_default();
    if let Some(level) = cli.log_level {
        logging.level = level;
    }
    init_logging(&logging);

    match cli.command {
        Commands::Serve => run_serve(cli.config).await,
        Commands::Init { output, bucket } => run_init(output, bucket),
        Commands::Validate => run_validate(cli.config),
        Commands::HashPassword { password } => {
            println!("{}", auth::hash_password(&password));
            Ok(())
        }
    }
}

/// Initialize logging
fn init_logging(logging: &LoggingConfig) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| logging.level.as_str().into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if logging.format == "compact" {
        registry.with(tracing_subscriber::fmt::layer().compact()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Start the HTTP server
async fn run_serve(config_path: PathBuf) -> Result<()> {
    let config = S3DeskConfig::from_file(&config_path)?;

    tracing::info!("Starting S3Desk v{}", env!("CARGO_PKG_VERSION"));
    match config.storage.backend {
        StorageBackend::S3 => tracing::info!(
            "Storage: s3 bucket '{}' ({})",
            config.storage.bucket,
            config.storage.endpoint.as_deref().unwrap_or(&config.storage.region)
        ),
        StorageBackend::Memory => {
            tracing::warn!("Storage: in-memory backend, contents are lost on restart")
        }
    }
    tracing::info!(
        "Credentials: {:?} secret '{}' (cache {}s)",
        config.credentials.source,
        config.credentials.secret_name,
        config.credentials.cache_ttl_secs
    );

    let store = storage::store_from_config(&config.storage)?;
    let credentials = auth::store_from_config(&config.credentials);
    let files = FileManager::new(store, config.storage.bulk_concurrency);

    let server = HttpServer::new(config.server.clone(), AppState::new(credentials, files));
    server.start().await?;

    tracing::info!("S3Desk stopped");
    Ok(())
}

/// Initialize a new configuration file
fn run_init(output: PathBuf, bucket: String) -> Result<()> {
    let config_content = format!(
        r#"# S3Desk Configuration
# Generated configuration file

[server]
bind_address = "0.0.0.0:8080"
# base_path = "/prod"
max_upload_mb = 100

[storage]
backend = "s3"
bucket = "{bucket}"
region = "us-east-1"
# endpoint = "http://localhost:9000"
# path_style = true
# access_key = "..."
# secret_key = "..."
max_retries = 2
retry_backoff_ms = 200
bulk_concurrency = 8

[credentials]
# "file" reads <secrets_dir>/<secret_name>, "env" reads the variable <secret_name>
source = "file"
secret_name = "s3desk-users"
secrets_dir = "/run/secrets"
cache_ttl_secs = 60

[logging]
level = "info"
format = "pretty"
"#
    );

    std::fs::write(&output, config_content)?;
    println!("Configuration written to {}", output.display());
    println!();
    println!("The credential secret is a JSON object keyed by username:");
    println!(r#"  {{"alice": {{"password": "sha256:...", "root_folder": "alice"}}}}"#);
    println!("Use `s3desk hash-password <password>` to produce the hashed form.");

    Ok(())
}

/// Validate configuration file
fn run_validate(config_path: PathBuf) -> Result<()> {
    match S3DeskConfig::from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Bind Address: {}", config.server.bind_address);
            if !config.server.base_path.is_empty() {
                println!("  Base Path: {}", config.server.base_path);
            }
            println!("  Max Upload: {} MB", config.server.max_upload_mb);
            match config.storage.backend {
                StorageBackend::S3 => println!("  Storage: s3://{}", config.storage.bucket),
                StorageBackend::Memory => println!("  Storage: memory"),
            }
            println!("  Credential Secret: {}", describe_secret(&config));
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e)
        }
    }
}

fn describe_secret(config: &S3DeskConfig) -> String {
    match config.credentials.source {
        CredentialSource::File => config.credentials.secret_path().display().to_string(),
        CredentialSource::Env => format!("${}", config.credentials.secret_name),
    }
}
