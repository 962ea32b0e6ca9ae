use anyhow::{Context, Result};
use clap::Parser;
use std::{env, path::PathBuf, str::FromStr, time::Duration};

const ENV_PREFIX: &str = "PDF_BACKEND_";

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub upload_dir: PathBuf,
    pub sessions_dir: PathBuf,
    pub database_url: String,
    pub summarizer_url: String,
    pub summarizer_timeout: Duration,
    pub max_file_size: u64,
    pub session_ttl: Duration,
    /// Zero disables the expiry sweep.
    pub sweep_interval: Duration,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Resumable chunked PDF upload backend")]
pub struct Args {
    /// Host to bind to (overrides PDF_BACKEND_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides PDF_BACKEND_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory for finalized PDFs (overrides PDF_BACKEND_UPLOAD_DIR)
    #[arg(long)]
    pub upload_dir: Option<PathBuf>,

    /// Directory for in-flight upload sessions (overrides PDF_BACKEND_SESSIONS_DIR)
    #[arg(long)]
    pub sessions_dir: Option<PathBuf>,

    /// Database URL (overrides PDF_BACKEND_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Summarization endpoint (overrides PDF_BACKEND_SUMMARIZER_URL)
    #[arg(long)]
    pub summarizer_url: Option<String>,

    /// Summarizer request timeout in seconds (overrides PDF_BACKEND_SUMMARIZER_TIMEOUT_SECS)
    #[arg(long)]
    pub summarizer_timeout_secs: Option<u64>,

    /// Largest accepted file in bytes (overrides PDF_BACKEND_MAX_FILE_SIZE)
    #[arg(long)]
    pub max_file_size: Option<u64>,

    /// Age after which unfinished sessions are deleted (overrides PDF_BACKEND_SESSION_TTL_SECS)
    #[arg(long)]
    pub session_ttl_secs: Option<u64>,

    /// Seconds between expiry sweeps, 0 to disable (overrides PDF_BACKEND_SWEEP_INTERVAL_SECS)
    #[arg(long)]
    pub sweep_interval_secs: Option<u64>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::resolve(args, |key| env::var(key))?, migrate))
    }

    /// Merge CLI args over environment values over defaults.
    fn resolve<F>(args: Args, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Result<String, env::VarError>,
    {
        let text = |name: &str, default: &str| -> Result<String> {
            let key = format!("{}{}", ENV_PREFIX, name);
            match lookup(&key) {
                Ok(value) => Ok(value),
                Err(env::VarError::NotPresent) => Ok(default.to_string()),
                Err(err) => Err(err).with_context(|| format!("reading {}", key)),
            }
        };
        let number = |name: &str, default: u64| -> Result<u64> {
            let key = format!("{}{}", ENV_PREFIX, name);
            match lookup(&key) {
                Ok(value) => parse_env(&key, &value),
                Err(env::VarError::NotPresent) => Ok(default),
                Err(err) => Err(err).with_context(|| format!("reading {}", key)),
            }
        };

        let env_port: u16 = match lookup(&format!("{}PORT", ENV_PREFIX)) {
            Ok(value) => parse_env(&format!("{}PORT", ENV_PREFIX), &value)?,
            Err(env::VarError::NotPresent) => 8080,
            Err(err) => return Err(err).context("reading PDF_BACKEND_PORT"),
        };

        let upload_dir = match args.upload_dir {
            Some(dir) => dir,
            None => PathBuf::from(text("UPLOAD_DIR", "./uploads")?),
        };
        let sessions_dir = match args.sessions_dir {
            Some(dir) => dir,
            None => match lookup(&format!("{}SESSIONS_DIR", ENV_PREFIX)) {
                Ok(dir) => PathBuf::from(dir),
                Err(env::VarError::NotPresent) => upload_dir.join(".chunks"),
                Err(err) => return Err(err).context("reading PDF_BACKEND_SESSIONS_DIR"),
            },
        };

        let cfg = Self {
            host: match args.host {
                Some(host) => host,
                None => text("HOST", "0.0.0.0")?,
            },
            port: args.port.unwrap_or(env_port),
            upload_dir,
            sessions_dir,
            database_url: match args.database_url {
                Some(url) => url,
                None => text("DATABASE_URL", "sqlite://./data/meta/pdf_backend.db")?,
            },
            summarizer_url: match args.summarizer_url {
                Some(url) => url,
                None => text("SUMMARIZER_URL", "http://localhost:8000/summarize")?,
            },
            summarizer_timeout: Duration::from_secs(match args.summarizer_timeout_secs {
                Some(secs) => secs,
                None => number("SUMMARIZER_TIMEOUT_SECS", 120)?,
            }),
            max_file_size: match args.max_file_size {
                Some(size) => size,
                None => number("MAX_FILE_SIZE", 10 * 1024 * 1024)?,
            },
            session_ttl: Duration::from_secs(match args.session_ttl_secs {
                Some(secs) => secs,
                None => number("SESSION_TTL_SECS", 24 * 60 * 60)?,
            }),
            sweep_interval: Duration::from_secs(match args.sweep_interval_secs {
                Some(secs) => secs,
                None => number("SWEEP_INTERVAL_SECS", 60 * 60)?,
            }),
        };

        if cfg.max_file_size == 0 {
            anyhow::bail!("max file size must be positive");
        }

        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_env<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse::<T>()
        .with_context(|| format!("parsing {} value `{}`", key, value))
}
