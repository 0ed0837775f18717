//! Configuration types for keysearcher
//!
//! This module defines:
//! - CLI argument parsing using clap derive macros
//! - Search tuning (cancellation and progress intervals)
//! - Runtime configuration with validation
//! - Hex input parsing

use crate::capability::{CipherKind, CostKind};
use crate::error::ConfigError;
use crate::job::JobDefinition;
use crate::keyspace::{hex_value, ChunkStrategy, KeyEncoding, KeyPattern};
use crate::runtime::local::MAX_WORKERS;
use crate::runtime::RuntimeConfig;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Default evaluations between cancellation checks
pub const DEFAULT_CANCEL_CHECK_INTERVAL: u64 = 100_000;

/// Default evaluations between progress reports
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 500_000;

/// Default keys per block
pub const DEFAULT_CHUNK_SIZE: u64 = 1 << 20;

/// Maximum attempts per block in the local runtime
const MAX_RETRIES: u32 = 100;

/// How often a block search looks up from its hot loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchTuning {
    /// Evaluations between cancellation checks
    pub cancel_check_interval: u64,

    /// Evaluations between progress reports
    pub progress_interval: u64,
}

impl Default for SearchTuning {
    fn default() -> Self {
        Self {
            cancel_check_interval: DEFAULT_CANCEL_CHECK_INTERVAL,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

/// Block-partitioned brute-force key search
#[derive(Parser, Debug, Clone)]
#[command(
    name = "keysearcher",
    version,
    about = "Block-partitioned brute-force key search",
    long_about = "Splits a key space into blocks, decrypts a ciphertext with every key of every block,\n\
                  scores each plaintext with a cost function and keeps the ten best keys.\n\n\
                  Jobs run offline on the calling thread or online through the local runtime,\n\
                  which spreads blocks over a pool of worker threads.",
    after_help = "EXAMPLES:\n    \
        keysearcher encrypt 'thequickbrownfox' --key 4F\n    \
        keysearcher search 3b272a3e3a262c24 --pattern '[0-9A-F][0-9A-F]' --chunk-size 16\n    \
        keysearcher search 3b272a3e3a262c24 --online -w 8 --cost entropy\n    \
        keysearcher pack 3b272a3e3a262c24 --block-bits 4 -o job.ksp\n    \
        keysearcher run job.ksp -w 4"
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,

    /// Quiet mode - suppress progress output
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,

    /// Verbose output (debug logging)
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,
}

/// Subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Search a ciphertext for its key
    Search {
        #[command(flatten)]
        job: JobArgs,

        #[command(flatten)]
        exec: ExecArgs,
    },

    /// Write a job payload file for later execution
    Pack {
        #[command(flatten)]
        job: JobArgs,

        /// Output payload file
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,
    },

    /// Execute a job payload file through the local runtime
    Run {
        /// Payload file written by `pack`
        #[arg(value_name = "PAYLOAD")]
        payload: PathBuf,

        #[command(flatten)]
        exec: ExecArgs,
    },

    /// XOR-encrypt a plaintext (for demos and tests)
    Encrypt {
        /// Plaintext to encrypt
        #[arg(value_name = "PLAINTEXT")]
        plaintext: String,

        /// Key as hex
        #[arg(short, long, value_name = "HEX")]
        key: String,
    },
}

/// What to search
#[derive(Args, Debug, Clone)]
pub struct JobArgs {
    /// Ciphertext as hex
    #[arg(value_name = "CIPHERTEXT_HEX")]
    pub ciphertext: String,

    /// Job name
    #[arg(long, default_value = "keysearch")]
    pub name: String,

    /// Key pattern; wildcard classes in brackets, e.g. '[0-9A-F][0-9A-F]'
    #[arg(short, long, default_value = "[0-9A-F][0-9A-F]", value_name = "PATTERN")]
    pub pattern: String,

    /// How key strings become key bytes
    #[arg(long, value_enum, default_value_t = EncodingArg::Hex)]
    pub encoding: EncodingArg,

    /// Cost function scoring each plaintext
    #[arg(long, value_enum, default_value_t = CostArg::Ioc)]
    pub cost: CostArg,

    /// Initialization vector as hex
    #[arg(long, value_name = "HEX")]
    pub iv: Option<String>,

    /// Decrypt only the first N bytes per key (0 = all)
    #[arg(long, default_value = "0", value_name = "N")]
    pub bytes_to_use: usize,

    /// Keys per block
    #[arg(long, value_name = "NUM", conflicts_with = "block_bits")]
    pub chunk_size: Option<u64>,

    /// Split the key space into 2^BITS blocks
    #[arg(long, value_name = "BITS")]
    pub block_bits: Option<u32>,
}

/// How to run it
#[derive(Args, Debug, Clone)]
pub struct ExecArgs {
    /// Run through the local distributed runtime instead of the calling thread
    #[arg(long)]
    pub online: bool,

    /// Number of worker threads (online mode)
    #[arg(short = 'w', long, default_value_t = default_workers(), value_name = "NUM")]
    pub workers: usize,

    /// Attempts a failing block gets before it is given up (online mode)
    #[arg(long, default_value = "3", value_name = "NUM")]
    pub max_retries: u32,

    /// Evaluations between cancellation checks
    #[arg(long, default_value_t = DEFAULT_CANCEL_CHECK_INTERVAL, value_name = "NUM")]
    pub cancel_interval: u64,

    /// Evaluations between progress reports
    #[arg(long, default_value_t = DEFAULT_PROGRESS_INTERVAL, value_name = "NUM")]
    pub progress_interval: u64,

    /// Expected blake3 hash of the job definition
    #[arg(long, value_name = "HASH")]
    pub expected_hash: Option<String>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingArg {
    Hex,
    Ascii,
}

impl From<EncodingArg> for KeyEncoding {
    fn from(arg: EncodingArg) -> Self {
        match arg {
            EncodingArg::Hex => KeyEncoding::Hex,
            EncodingArg::Ascii => KeyEncoding::Ascii,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CostArg {
    /// Index of coincidence (maximize)
    Ioc,
    /// Shannon entropy (minimize)
    Entropy,
}

impl From<CostArg> for CostKind {
    fn from(arg: CostArg) -> Self {
        match arg {
            CostArg::Ioc => CostKind::IndexOfCoincidence,
            CostArg::Entropy => CostKind::Entropy,
        }
    }
}

fn default_workers() -> usize {
    num_cpus::get()
}

/// Validated execution settings
#[derive(Debug, Clone)]
pub struct ExecConfig {
    /// Run through the local runtime
    pub online: bool,

    pub runtime: RuntimeConfig,

    pub tuning: SearchTuning,

    /// Hash the job definition must have
    pub expected_hash: Option<String>,
}

impl ExecConfig {
    fn from_args(args: ExecArgs) -> Result<Self, ConfigError> {
        if args.workers == 0 || args.workers > MAX_WORKERS {
            return Err(ConfigError::InvalidWorkerCount {
                count: args.workers,
                max: MAX_WORKERS,
            });
        }
        if args.cancel_interval == 0 {
            return Err(ConfigError::InvalidInterval {
                name: "cancel",
                value: 0,
            });
        }
        if args.progress_interval == 0 {
            return Err(ConfigError::InvalidInterval {
                name: "progress",
                value: 0,
            });
        }

        let mut runtime = RuntimeConfig::with_workers(args.workers);
        runtime.max_retries = args.max_retries.min(MAX_RETRIES);

        Ok(Self {
            online: args.online,
            runtime,
            tuning: SearchTuning {
                cancel_check_interval: args.cancel_interval,
                progress_interval: args.progress_interval,
            },
            expected_hash: args.expected_hash.map(|h| h.trim().to_ascii_lowercase()),
        })
    }
}

/// Validated action to perform
#[derive(Debug, Clone)]
pub enum Action {
    Search {
        definition: JobDefinition,
        exec: ExecConfig,
    },
    Pack {
        definition: JobDefinition,
        output: PathBuf,
    },
    Run {
        payload: PathBuf,
        exec: ExecConfig,
    },
    Encrypt {
        plaintext: Vec<u8>,
        key: Vec<u8>,
    },
}

/// Validated runtime configuration
#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub action: Action,

    /// Show progress indicator
    pub show_progress: bool,

    /// Verbose logging
    pub verbose: bool,
}

impl SearchConfig {
    /// Create and validate configuration from CLI arguments
    pub fn from_args(args: CliArgs) -> Result<Self, ConfigError> {
        let action = match args.command {
            Command::Search { job, exec } => Action::Search {
                definition: definition_from_args(job)?,
                exec: ExecConfig::from_args(exec)?,
            },
            Command::Pack { job, output } => {
                if let Some(parent) = output.parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        return Err(ConfigError::InvalidOutputPath {
                            path: output.clone(),
                            reason: format!("Parent directory '{}' does not exist", parent.display()),
                        });
                    }
                }
                Action::Pack {
                    definition: definition_from_args(job)?,
                    output,
                }
            }
            Command::Run { payload, exec } => {
                // Payload jobs always go through the local runtime
                let mut exec = ExecConfig::from_args(exec)?;
                exec.online = true;
                Action::Run { payload, exec }
            }
            Command::Encrypt { plaintext, key } => {
                let key = parse_hex(&key)?;
                if key.is_empty() {
                    return Err(ConfigError::InvalidHex {
                        input: String::new(),
                        reason: "key is empty".into(),
                    });
                }
                Action::Encrypt {
                    plaintext: plaintext.into_bytes(),
                    key,
                }
            }
        };

        Ok(Self {
            action,
            show_progress: !args.quiet,
            verbose: args.verbose,
        })
    }
}

/// Build and validate a job definition from CLI arguments
fn definition_from_args(args: JobArgs) -> Result<JobDefinition, ConfigError> {
    let ciphertext = parse_hex(&args.ciphertext)?;
    if ciphertext.is_empty() {
        return Err(ConfigError::EmptyCiphertext);
    }
    let iv = match &args.iv {
        Some(iv) => parse_hex(iv)?,
        None => Vec::new(),
    };

    let encoding = KeyEncoding::from(args.encoding);
    let pattern = KeyPattern::new(&args.pattern, encoding)?;

    let chunking = match (args.chunk_size, args.block_bits) {
        (_, Some(bits)) => ChunkStrategy::BlockBits(bits),
        (Some(size), None) => ChunkStrategy::ChunkSize(size),
        (None, None) => ChunkStrategy::ChunkSize(DEFAULT_CHUNK_SIZE),
    };
    // Rejects zero chunks, bad bit counts and chunks too large for a block
    chunking.chunk_size(pattern.key_count())?;

    Ok(JobDefinition {
        name: args.name,
        ciphertext,
        iv,
        bytes_to_use: args.bytes_to_use,
        key_pattern: args.pattern,
        key_encoding: encoding,
        cipher: CipherKind::Xor,
        cost: args.cost.into(),
        chunking,
    })
}

/// Parse hex input, ignoring whitespace, `:` separators and a `0x` prefix
pub fn parse_hex(input: &str) -> Result<Vec<u8>, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidHex {
        input: input.to_string(),
        reason,
    };

    let trimmed = input.trim();
    let body = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    let mut nibbles = Vec::with_capacity(body.len());
    for c in body.bytes() {
        if c.is_ascii_whitespace() || c == b':' {
            continue;
        }
        let value = hex_value(c).ok_or_else(|| invalid(format!("'{}' is not a hex digit", c as char)))?;
        nibbles.push(value);
    }
    if nibbles.len() % 2 != 0 {
        return Err(invalid("odd number of hex digits".into()));
    }
    Ok(nibbles.chunks(2).map(|pair| (pair[0] << 4) | pair[1]).collect())
}

/// Format bytes as lowercase hex
pub fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{:02x}", b);
    }
    out
}
