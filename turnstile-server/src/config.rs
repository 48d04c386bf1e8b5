//! Server configuration and CLI argument parsing
//!
//! This module handles all server configuration through a flexible system that supports:
//! - Command-line arguments
//! - Environment variables (with TURNSTILE_ prefix)
//! - A policy file (TOML, YAML or JSON) for larger policy sets
//!
//! # Configuration Priority
//!
//! The configuration system follows this precedence order:
//! 1. CLI arguments (highest priority)
//! 2. Environment variables
//! 3. Default values (lowest priority)
//!
//! Policies from `--policy-file` and `--policy` are merged; a purpose may
//! only be configured once. With no policies at all the server protects
//! `auth:login` at 5 requests per minute with a burst of 5.
//!
//! # Example Usage
//!
//! ```bash
//! # Using CLI arguments
//! turnstile --redis-url redis://10.0.0.5:6379/0 --policy auth:login=5/5 --policy search=60/10
//!
//! # Using environment variables
//! export TURNSTILE_HTTP_PORT=8080
//! export TURNSTILE_STORE=memory
//! export TURNSTILE_POLICY=auth:login=5/5,search=60/10
//! turnstile
//!
//! # Policy file
//! turnstile --policy-file policies.toml
//! ```
//!
//! A policy file lists one `[[policies]]` table per protected operation:
//!
//! ```toml
//! [[policies]]
//! purpose = "auth:login"
//! limit_per_minute = 5
//! burst = 5
//!
//! [[policies]]
//! purpose = "export"
//! limit_per_minute = 2
//! identity = "principal"
//! ```

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use turnstile::{PolicyError, RatePolicy};

/// Purpose protected when no policy is configured
pub const DEFAULT_PURPOSE: &str = "auth:login";

/// Main configuration structure for the server
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP transport configuration
    pub http: HttpConfig,
    /// Bucket store configuration
    pub store: StoreConfig,
    /// Protected operations, in configuration order
    pub policies: Vec<PolicyConfig>,
    /// Logging level (error, warn, info, debug, trace)
    pub log_level: String,
    /// Emit logs as JSON lines
    pub log_json: bool,
}

/// HTTP transport configuration
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Host address to bind to (e.g., "0.0.0.0")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

/// Bucket store configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Type of store to use
    pub store_type: StoreType,
    /// Redis connection URL
    pub redis_url: String,
    /// Upper bound on every store call (milliseconds)
    pub timeout_ms: u64,
    /// Initial capacity of the memory store
    pub capacity: usize,
    /// Cleanup interval for the memory store (seconds)
    pub cleanup_interval: u64,
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Available bucket stores
///
/// - **Redis**: shared by every server instance; the production choice
/// - **Memory**: process-local, for development and single-instance setups
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum StoreType {
    /// Shared Redis server
    Redis,
    /// In-process store
    Memory,
}

impl std::str::FromStr for StoreType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "redis" => Ok(StoreType::Redis),
            "memory" => Ok(StoreType::Memory),
            _ => Err(anyhow!(
                "Invalid store type: {}. Valid options are: redis, memory",
                s
            )),
        }
    }
}

/// How a policy derives the caller's identity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityKind {
    /// Authenticated principal, else network address
    #[default]
    PrincipalOrAddr,
    /// Network address only
    Addr,
    /// Authenticated principal only
    Principal,
}

impl std::str::FromStr for IdentityKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "principal_or_addr" => Ok(IdentityKind::PrincipalOrAddr),
            "addr" => Ok(IdentityKind::Addr),
            "principal" => Ok(IdentityKind::Principal),
            _ => Err(anyhow!(
                "Invalid identity: {}. Valid options are: principal_or_addr, addr, principal",
                s
            )),
        }
    }
}

fn default_burst() -> u32 {
    1
}

/// One protected operation
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PolicyConfig {
    pub purpose: String,
    pub limit_per_minute: u32,
    #[serde(default = "default_burst")]
    pub burst: u32,
    #[serde(default)]
    pub identity: IdentityKind,
}

impl PolicyConfig {
    /// Validated library policy
    pub fn rate_policy(&self) -> Result<RatePolicy, PolicyError> {
        RatePolicy::per_minute(self.purpose.as_str(), self.limit_per_minute, self.burst)
    }

    fn default_login() -> Self {
        PolicyConfig {
            purpose: DEFAULT_PURPOSE.to_string(),
            limit_per_minute: 5,
            burst: 5,
            identity: IdentityKind::PrincipalOrAddr,
        }
    }
}

/// `PURPOSE=LIMIT[/BURST]` as given on the command line
#[derive(Debug, Clone, PartialEq)]
pub struct PolicySpec(pub PolicyConfig);

impl std::str::FromStr for PolicySpec {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (purpose, limits) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("Invalid policy: {}. Expected PURPOSE=LIMIT[/BURST]", s))?;
        let purpose = purpose.trim();
        if purpose.is_empty() {
            return Err(anyhow!("Invalid policy: {}. Purpose must not be empty", s));
        }

        let (limit, burst) = match limits.split_once('/') {
            Some((limit, burst)) => (limit, Some(burst)),
            None => (limits, None),
        };
        let limit_per_minute = limit
            .trim()
            .parse()
            .with_context(|| format!("Invalid limit in policy: {s}"))?;
        let burst = match burst {
            Some(burst) => burst
                .trim()
                .parse()
                .with_context(|| format!("Invalid burst in policy: {s}"))?,
            None => default_burst(),
        };

        Ok(PolicySpec(PolicyConfig {
            purpose: purpose.to_string(),
            limit_per_minute,
            burst,
            identity: IdentityKind::default(),
        }))
    }
}

#[derive(Debug, Deserialize)]
struct PolicyFile {
    #[serde(default)]
    policies: Vec<PolicyConfig>,
}

/// Read the `[[policies]]` entries of a policy file
///
/// The format follows the file extension (`.toml`, `.yaml`, `.json`, ...).
pub fn load_policy_file(path: &Path) -> Result<Vec<PolicyConfig>> {
    let file: PolicyFile = ::config::Config::builder()
        .add_source(::config::File::from(path))
        .build()
        .and_then(|settings| settings.try_deserialize())
        .with_context(|| format!("Failed to load policy file {}", path.display()))?;

    Ok(file.policies)
}

/// Command-line arguments for the server
///
/// All arguments can also be set via environment variables with the
/// TURNSTILE_ prefix. CLI arguments take precedence over environment variables.
///
/// # Examples
///
/// Login protection backed by a local Redis:
/// ```bash
/// turnstile
/// ```
///
/// Several policies on an in-memory store with debug logging:
/// ```bash
/// turnstile --store memory --policy auth:login=5/5 --policy search=60/10 --log-level debug
/// ```
#[derive(Parser, Debug)]
#[command(
    name = "turnstile",
    about = "Token-bucket admission server",
    long_about = "A token-bucket admission server sharing its buckets through Redis.\n\nEvery configured policy protects one purpose; callers ask POST /admit/{purpose} before doing the protected work.\n\nEnvironment variables with TURNSTILE_ prefix are supported. CLI arguments take precedence over environment variables."
)]
pub struct Args {
    // HTTP Transport
    #[arg(
        long,
        value_name = "HOST",
        help = "HTTP host",
        default_value = "127.0.0.1",
        env = "TURNSTILE_HTTP_HOST"
    )]
    pub http_host: String,
    #[arg(
        long,
        value_name = "PORT",
        help = "HTTP port",
        default_value_t = 8080,
        env = "TURNSTILE_HTTP_PORT"
    )]
    pub http_port: u16,

    // Store Configuration
    #[arg(
        long,
        value_name = "TYPE",
        help = "Store type: redis, memory",
        default_value = "redis",
        env = "TURNSTILE_STORE"
    )]
    pub store: StoreType,
    #[arg(
        long,
        value_name = "URL",
        help = "Redis connection URL",
        default_value = "redis://127.0.0.1:6379/0",
        env = "TURNSTILE_REDIS_URL"
    )]
    pub redis_url: String,
    #[arg(
        long,
        value_name = "MS",
        help = "Store call timeout in milliseconds",
        default_value_t = 250,
        env = "TURNSTILE_STORE_TIMEOUT_MS"
    )]
    pub store_timeout_ms: u64,
    #[arg(
        long,
        value_name = "SIZE",
        help = "Initial memory store capacity",
        default_value_t = 100_000,
        env = "TURNSTILE_STORE_CAPACITY"
    )]
    pub store_capacity: usize,
    #[arg(
        long,
        value_name = "SECS",
        help = "Cleanup interval for the memory store (seconds)",
        default_value_t = 300,
        env = "TURNSTILE_STORE_CLEANUP_INTERVAL"
    )]
    pub store_cleanup_interval: u64,

    // Policies
    #[arg(
        long = "policy",
        value_name = "PURPOSE=LIMIT[/BURST]",
        help = "Protect PURPOSE with LIMIT requests per minute (repeatable)",
        env = "TURNSTILE_POLICY",
        value_delimiter = ','
    )]
    pub policies: Vec<PolicySpec>,
    #[arg(
        long,
        value_name = "PATH",
        help = "Policy file with [[policies]] entries",
        env = "TURNSTILE_POLICY_FILE"
    )]
    pub policy_file: Option<PathBuf>,

    // General options
    #[arg(
        long,
        value_name = "LEVEL",
        help = "Log level: error, warn, info, debug, trace",
        default_value = "info",
        env = "TURNSTILE_LOG_LEVEL"
    )]
    pub log_level: String,
    #[arg(long, help = "Emit logs as JSON", env = "TURNSTILE_LOG_JSON")]
    pub log_json: bool,

    // Utility options
    #[arg(
        long,
        help = "List all environment variables and exit",
        action = clap::ArgAction::SetTrue
    )]
    pub list_env_vars: bool,
}

impl Config {
    /// Build configuration from environment variables and CLI arguments
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The policy file cannot be read or parsed
    /// - A policy is invalid or a purpose is configured twice
    /// - Invalid store settings are provided
    pub fn from_env_and_args() -> Result<Self> {
        let args = Args::parse();

        // Handle --list-env-vars
        if args.list_env_vars {
            Self::print_env_vars();
            std::process::exit(0);
        }

        Self::from_args(args)
    }

    /// Build and validate configuration from parsed arguments
    pub fn from_args(args: Args) -> Result<Self> {
        let mut policies = match &args.policy_file {
            Some(path) => load_policy_file(path)?,
            None => Vec::new(),
        };
        policies.extend(args.policies.into_iter().map(|PolicySpec(policy)| policy));

        if policies.is_empty() {
            policies.push(PolicyConfig::default_login());
        }

        let config = Config {
            http: HttpConfig {
                host: args.http_host,
                port: args.http_port,
            },
            store: StoreConfig {
                store_type: args.store,
                redis_url: args.redis_url,
                timeout_ms: args.store_timeout_ms,
                capacity: args.store_capacity,
                cleanup_interval: args.store_cleanup_interval,
            },
            policies,
            log_level: args.log_level,
            log_json: args.log_json,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    fn validate(&self) -> Result<()> {
        if self.policies.is_empty() {
            return Err(anyhow!("At least one policy must be configured"));
        }

        let mut seen = HashSet::new();
        for policy in &self.policies {
            policy
                .rate_policy()
                .with_context(|| format!("Invalid policy for purpose '{}'", policy.purpose))?;
            if !seen.insert(policy.purpose.as_str()) {
                return Err(anyhow!(
                    "Purpose '{}' is configured more than once",
                    policy.purpose
                ));
            }
        }

        if self.store.timeout_ms == 0 {
            return Err(anyhow!("Store timeout must be greater than zero"));
        }

        if self.store.store_type == StoreType::Redis && self.store.redis_url.trim().is_empty() {
            return Err(anyhow!(
                "A Redis URL is required for the redis store.\n\n\
                Example:\n  \
                turnstile --redis-url redis://127.0.0.1:6379/0\n  \
                turnstile --store memory\n\n\
                For more information, try '--help'"
            ));
        }

        Ok(())
    }

    /// Print all available environment variables and their descriptions
    fn print_env_vars() {
        println!("Turnstile Environment Variables");
        println!("===============================");
        println!();
        println!("All environment variables use the TURNSTILE_ prefix.");
        println!("CLI arguments take precedence over environment variables.");
        println!();

        println!("Transport Configuration:");
        println!("  TURNSTILE_HTTP_HOST=<host>            HTTP host [default: 127.0.0.1]");
        println!("  TURNSTILE_HTTP_PORT=<port>            HTTP port [default: 8080]");
        println!();

        println!("Store Configuration:");
        println!("  TURNSTILE_STORE=<type>                Store type: redis, memory [default: redis]");
        println!(
            "  TURNSTILE_REDIS_URL=<url>             Redis URL [default: redis://127.0.0.1:6379/0]"
        );
        println!(
            "  TURNSTILE_STORE_TIMEOUT_MS=<ms>       Store call timeout [default: 250]"
        );
        println!();
        println!("  For memory store:");
        println!(
            "    TURNSTILE_STORE_CAPACITY=<size>              Initial capacity [default: 100000]"
        );
        println!(
            "    TURNSTILE_STORE_CLEANUP_INTERVAL=<secs>      Cleanup interval in seconds [default: 300]"
        );
        println!();

        println!("Policy Configuration:");
        println!(
            "  TURNSTILE_POLICY=<list>               Comma-separated PURPOSE=LIMIT[/BURST] entries"
        );
        println!("  TURNSTILE_POLICY_FILE=<path>          Policy file with [[policies]] entries");
        println!("  With no policies, {DEFAULT_PURPOSE} is limited to 5 per minute, burst 5.");
        println!();

        println!("General Configuration:");
        println!(
            "  TURNSTILE_LOG_LEVEL=<level>           Log level: error, warn, info, debug, trace [default: info]"
        );
        println!("  TURNSTILE_LOG_JSON=true|false         Emit logs as JSON [default: false]");
        println!();

        println!("Examples:");
        println!("  # Protect login and search with a shared Redis");
        println!("  export TURNSTILE_REDIS_URL=redis://10.0.0.5:6379/0");
        println!("  export TURNSTILE_POLICY=auth:login=5/5,search=60/10");
        println!();
        println!("  # Run server (CLI args override env vars)");
        println!("  turnstile --http-port 9090");
    }
}
