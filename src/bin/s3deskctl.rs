//! S3DeskCtl - Command line client for an S3Desk gateway
//!
//! Usage:
//!   s3deskctl ls [prefix]             - List folders and files
//!   s3deskctl files [prefix]          - List the files directly inside a folder
//!   s3deskctl get <key> [-o file]     - Download a file
//!   s3deskctl put <file> [key]        - Upload a file
//!   s3deskctl mkdir <folder>          - Create an empty folder
//!   s3deskctl rm <key>                - Delete a file
//!   s3deskctl pull <folder> [-o zip]  - Download a folder as a zip archive
//!   s3deskctl rmdir <folder>          - Delete a folder and everything in it

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;

use s3desk::config::S3DeskConfig;

const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:8080";

/// S3Desk Command Line Client
#[derive(Parser)]
#[command(name = "s3deskctl")]
#[command(about = "Browse and manage files through an S3Desk gateway", long_about = None)]
struct Cli {
    /// Path to config file, used to find the gateway address
    #[arg(short, long, default_value = "s3desk.toml")]
    config: PathBuf,

    /// API endpoint to connect to (overrides config)
    #[arg(short, long)]
    endpoint: Option<String>,

    /// Username
    #[arg(short, long, env = "S3DESK_USER")]
    user: String,

    /// Password
    #[arg(short, long, env = "S3DESK_PASSWORD", hide_env_values = true)]
    password: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the folders and files directly inside a folder
    Ls {
        /// Folder to list (defaults to your root folder)
        prefix: Option<String>,
    },
    /// List the files directly inside a folder
    Files {
        prefix: Option<String>,
    },
    /// Download a file
    Get {
        key: String,
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Upload a local file
    Put {
        /// Local file to upload
        file: PathBuf,
        /// Destination key (defaults to the local file name)
        key: Option<String>,
    },
    /// Create an empty folder
    Mkdir {
        folder: String,
    },
    /// Delete a file
    Rm {
        key: String,
    },
    /// Download a folder as a zip archive
    Pull {
        folder: String,
        /// Archive path (defaults to <folder>.zip)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Delete a folder and everything in it
    Rmdir {
        folder: String,
    },
}

// ============ API Response Types ============

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Deserialize)]
struct DeleteReport {
    deleted: Vec<String>,
    #[serde(default)]
    failed: Vec<FailedDeletion>,
}

#[derive(Debug, Deserialize)]
struct FailedDeletion {
    key: String,
    error: String,
}

// ============ Client ============

struct Gateway {
    client: Client,
    endpoint: String,
    user: String,
    password: String,
}

impl Gateway {
    fn request(&self, method: reqwest::Method, route: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}/{}", self.endpoint, route))
            .basic_auth(&self.user, Some(&self.password))
    }

    async fn send(&self, request: RequestBuilder) -> anyhow::Result<Response> {
        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", self.endpoint))?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        match serde_json::from_str::<ErrorResponse>(&body) {
            Ok(err) => bail!("{} ({})", err.error, status),
            Err(_) => bail!("API error: {}", status),
        }
    }
}

// ============ Main ============

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let gateway = Gateway {
        client: Client::new(),
        endpoint: resolve_endpoint(cli.endpoint.as_deref(), &cli.config),
        user: cli.user.clone(),
        password: cli.password.clone(),
    };

    let result = match &cli.command {
        Commands::Ls { prefix } => list(&gateway, "list", prefix.as_deref()).await,
        Commands::Files { prefix } => list(&gateway, "list-files", prefix.as_deref()).await,
        Commands::Get { key, output } => get(&gateway, key, output.as_deref()).await,
        Commands::Put { file, key } => put(&gateway, file, key.as_deref()).await,
        Commands::Mkdir { folder } => mkdir(&gateway, folder).await,
        Commands::Rm { key } => remove(&gateway, key).await,
        Commands::Pull { folder, output } => pull(&gateway, folder, output.as_deref()).await,
        Commands::Rmdir { folder } => rmdir(&gateway, folder).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

/// Pick the gateway URL from the flag, then the local config, then the default
fn resolve_endpoint(flag: Option<&str>, config_path: &Path) -> String {
    if let Some(endpoint) = flag {
        return endpoint.trim_end_matches('/').to_string();
    }

    let config = std::fs::read_to_string(config_path)
        .ok()
        .and_then(|content| toml::from_str::<S3DeskConfig>(&content).ok());

    match config {
        Some(config) => {
            let addr = &config.server.bind_address;
            // A wildcard bind is reachable on loopback
            let host = if let Some(port) = addr.strip_prefix("0.0.0.0:") {
                format!("127.0.0.1:{}", port)
            } else {
                addr.clone()
            };
            format!("http://{}{}", host, config.server.base_path.trim_end_matches('/'))
        }
        None => DEFAULT_ENDPOINT.to_string(),
    }
}

// ============ Commands ============

async fn list(gateway: &Gateway, route: &str, prefix: Option<&str>) -> anyhow::Result<()> {
    let mut request = gateway.request(reqwest::Method::GET, route);
    if let Some(prefix) = prefix {
        request = request.query(&[("prefix", prefix)]);
    }

    let names: Vec<String> = gateway.send(request).await?.json().await?;
    if names.is_empty() {
        println!("(empty)");
    }
    for name in names {
        if name.ends_with('/') {
            println!("\x1b[1;34m{}\x1b[0m", name); // Bold Blue
        } else {
            println!("{}", name);
        }
    }
    Ok(())
}

async fn get(gateway: &Gateway, key: &str, output: Option<&Path>) -> anyhow::Result<()> {
    let request = gateway
        .request(reqwest::Method::GET, "get")
        .query(&[("filename", key)]);
    let body = gateway.send(request).await?.bytes().await?;

    match output {
        Some(path) => {
            std::fs::write(path, &body)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!("Saved {} ({} bytes)", path.display(), body.len());
        }
        None => std::io::stdout().write_all(&body)?,
    }
    Ok(())
}

async fn put(gateway: &Gateway, file: &Path, key: Option<&str>) -> anyhow::Result<()> {
    let key = match key {
        Some(key) => key.to_string(),
        None => file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .context("Cannot derive a key from the file name, pass one explicitly")?,
    };
    let body = std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;

    let request = gateway
        .request(reqwest::Method::PUT, "put")
        .query(&[("filename", key.as_str())])
        .body(body);
    println!("{}", gateway.send(request).await?.text().await?);
    Ok(())
}

async fn mkdir(gateway: &Gateway, folder: &str) -> anyhow::Result<()> {
    let key = format!("{}/", folder.trim_end_matches('/'));
    let request = gateway
        .request(reqwest::Method::PUT, "put")
        .query(&[("filename", key.as_str())]);
    println!("{}", gateway.send(request).await?.text().await?);
    Ok(())
}

async fn remove(gateway: &Gateway, key: &str) -> anyhow::Result<()> {
    let request = gateway
        .request(reqwest::Method::DELETE, "delete")
        .query(&[("filename", key)]);
    println!("{}", gateway.send(request).await?.text().await?);
    Ok(())
}

async fn pull(gateway: &Gateway, folder: &str, output: Option<&Path>) -> anyhow::Result<()> {
    let request = gateway
        .request(reqwest::Method::GET, "download-folder")
        .query(&[("prefix", folder)]);
    let archive = gateway.send(request).await?.bytes().await?;

    let path = match output {
        Some(path) => path.to_path_buf(),
        None => {
            let name = folder.trim_matches('/').rsplit('/').next().unwrap_or("");
            PathBuf::from(format!("{}.zip", if name.is_empty() { "folder" } else { name }))
        }
    };
    std::fs::write(&path, &archive).with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Saved {} ({} bytes)", path.display(), archive.len());
    Ok(())
}

async fn rmdir(gateway: &Gateway, folder: &str) -> anyhow::Result<()> {
    let request = gateway
        .request(reqwest::Method::DELETE, "delete-folder")
        .query(&[("prefix", folder)]);

    // A partial delete answers 500 with the report, so read it before checking status
    let response = request
        .send()
        .await
        .with_context(|| format!("Failed to reach {}", gateway.endpoint))?;
    let status = response.status();
    let body = response.text().await?;

    let report = match serde_json::from_str::<DeleteReport>(&body) {
        Ok(report) => report,
        Err(_) => match serde_json::from_str::<ErrorResponse>(&body) {
            Ok(err) => bail!("{} ({})", err.error, status),
            Err(_) => bail!("API error: {}", status),
        },
    };

    println!("Deleted {} object(s)", report.deleted.len());
    if !report.failed.is_empty() {
        for failure in &report.failed {
            eprintln!("  \x1b[31mfailed\x1b[0m {}: {}", failure.key, failure.error);
        }
        bail!("{} object(s) could not be deleted", report.failed.len());
    }
    Ok(())
}
