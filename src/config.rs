use crate::block::BLOCK_SIZE;
use crate::cursor::DEFAULT_CHUNK_SIZE;
use crate::metadata::DEFAULT_QUANT_METHOD;
use crate::search::{GENOMIC_CONTEXT_WINDOW, SearchConfig};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

pub const CATALOG_FILE: &str = "catalog.json";

#[derive(Debug, Clone, Parser)]
#[command(name = "sumstatsr")]
#[command(about = "Summary statistics association store and search server")]
pub struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "info", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Serve association searches over HTTP
    Serve(Config),
    /// Load a JSON-lines file of association records
    Load(LoadArgs),
    /// Recount a block store and check its declared sizes
    Verify(VerifyArgs),
}

/// How partitions are laid out under the data directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// chromosome/block/load-group tree
    Blocks,
    /// one position-sorted table per dataset and chromosome
    Tables,
    /// one document collection per study, held in memory
    Collections,
}

#[derive(Debug, Clone, Args)]
pub struct Config {
    /// Host address to bind to
    #[arg(long, env = "SUMSTATS_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "SUMSTATS_PORT", default_value = "8080")]
    pub port: u16,

    /// Directory containing the association store
    #[arg(long, env = "SUMSTATS_DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    #[arg(long, env = "SUMSTATS_BACKEND", value_enum, default_value = "blocks")]
    pub backend: Backend,

    /// Metadata catalog (defaults to <data_dir>/catalog.json)
    #[arg(long, env = "SUMSTATS_METADATA")]
    pub metadata: Option<PathBuf>,

    /// Genomic block width in base pairs
    #[arg(long, env = "SUMSTATS_BLOCK_SIZE", default_value_t = BLOCK_SIZE)]
    pub block_size: u64,

    /// Records requested per partition read
    #[arg(long, env = "SUMSTATS_CHUNK_SIZE", default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,

    /// Page size when the request names none
    #[arg(long, env = "SUMSTATS_DEFAULT_SIZE", default_value = "20")]
    pub default_size: usize,

    /// Largest page size served; larger requests are clamped
    #[arg(long, env = "SUMSTATS_MAX_SIZE", default_value = "1000")]
    pub max_size: usize,

    /// Quantification method used when resolving dataset files
    #[arg(long, env = "SUMSTATS_QUANT_METHOD", default_value = DEFAULT_QUANT_METHOD)]
    pub quant_method: String,

    /// Enable CORS for all origins
    #[arg(long, env = "SUMSTATS_CORS", default_value = "true")]
    pub cors: bool,
}

impl Config {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.metadata
            .clone()
            .unwrap_or_else(|| self.data_dir.join(CATALOG_FILE))
    }

    pub fn search_config(&self) -> SearchConfig {
        SearchConfig {
            default_size: self.default_size.clamp(1, self.max_size.max(1)),
            max_size: self.max_size.max(1),
            chunk_size: self.chunk_size.max(1),
            quant_method: self.quant_method.clone(),
            context_window: GENOMIC_CONTEXT_WINDOW,
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct LoadArgs {
    /// JSON-lines file with one association record per line
    pub input: PathBuf,

    /// Study the records belong to
    #[arg(long)]
    pub study: String,

    /// Load identifier (a random v4 uuid when omitted)
    #[arg(long)]
    pub uuid: Option<String>,

    /// Dataset id for table loads (defaults to the study)
    #[arg(long)]
    pub dataset: Option<String>,

    #[arg(long, env = "SUMSTATS_DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    #[arg(long, env = "SUMSTATS_BACKEND", value_enum, default_value = "blocks")]
    pub backend: Backend,

    /// Metadata catalog to update (defaults to <data_dir>/catalog.json)
    #[arg(long, env = "SUMSTATS_METADATA")]
    pub metadata: Option<PathBuf>,

    #[arg(long, env = "SUMSTATS_BLOCK_SIZE", default_value_t = BLOCK_SIZE)]
    pub block_size: u64,

    /// Rows per indexed chunk for table loads
    #[arg(long, default_value = "10000")]
    pub chunk_rows: usize,
}

impl LoadArgs {
    pub fn metadata_path(&self) -> PathBuf {
        self.metadata
            .clone()
            .unwrap_or_else(|| self.data_dir.join(CATALOG_FILE))
    }
}

#[derive(Debug, Clone, Args)]
pub struct VerifyArgs {
    #[arg(long, env = "SUMSTATS_DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    #[arg(long, env = "SUMSTATS_BLOCK_SIZE", default_value_t = BLOCK_SIZE)]
    pub block_size: u64,
}
