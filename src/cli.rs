use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// tokenator: populate snap repositories' GitHub environments with fresh
/// store, build and bot credentials
#[derive(Parser, Debug)]
#[command(name = "tokenator", version, about)]
pub struct Cli {
    /// Only process these repositories (comma separated); default is all configured repositories
    #[arg(short, long, value_delimiter = ',')]
    pub repos: Vec<String>,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Path to the config file; default searches ./, ~/.config/tokenator/ and /etc/tokenator/
    #[arg(short, long, env = "TOKENATOR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

impl Cli {
    /// Default filter directive when `RUST_LOG` is unset.
    pub fn default_log_filter(&self) -> &'static str {
        if self.verbose {
            "tokenator=debug"
        } else {
            "tokenator=info"
        }
    }
}
