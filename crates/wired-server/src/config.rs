use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub shell: String,
    pub workdir: PathBuf,
    pub storage_dir: PathBuf,
    /// How long a new connection waits for its first resize before the shell
    /// is spawned at the default size.
    pub resize_grace: Duration,
    /// Largest accepted `/upload` request body.
    pub max_upload_bytes: usize,
}

#[derive(Debug, Parser)]
#[command(name = "wired-term", version, about = "Browser terminal server")]
pub struct Cli {
    /// Interface to listen on.
    #[arg(long, env = "WIRED_HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "PORT", default_value_t = 3939)]
    pub port: u16,

    /// Shell spawned for every connection. Defaults to bash, else /bin/sh.
    #[arg(long, env = "SHELL")]
    pub shell: Option<String>,

    /// Working directory of spawned shells.
    #[arg(long, env = "HOME")]
    pub workdir: Option<PathBuf>,

    /// Where uploaded files land. Defaults to `<workdir>/storage`.
    #[arg(long, env = "WIRED_STORAGE_DIR")]
    pub storage_dir: Option<PathBuf>,

    #[arg(long, env = "WIRED_RESIZE_GRACE_MS", default_value_t = 50)]
    pub resize_grace_ms: u64,

    /// Upload size limit in megabytes, for the whole multipart body.
    #[arg(long, env = "WIRED_MAX_UPLOAD_MB", default_value_t = 100)]
    pub max_upload_mb: usize,
}

impl TryFrom<Cli> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let listen_addr: SocketAddr = format!("{}:{}", cli.host, cli.port)
            .parse()
            .with_context(|| format!("invalid listen address: {}:{}", cli.host, cli.port))?;
        let workdir = match cli.workdir {
            Some(dir) => dir,
            None => std::env::current_dir().context("cannot determine working directory")?,
        };
        let storage_dir = cli.storage_dir.unwrap_or_else(|| workdir.join("storage"));
        Ok(ServerConfig {
            listen_addr,
            shell: cli.shell.unwrap_or_else(wired_pty::default_shell),
            workdir,
            storage_dir,
            resize_grace: Duration::from_millis(cli.resize_grace_ms),
            max_upload_bytes: cli.max_upload_mb.saturating_mul(1024 * 1024),
        })
    }
}
