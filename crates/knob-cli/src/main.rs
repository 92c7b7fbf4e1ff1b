//! knob: revocable file encryption CLI
//!
//! Commands:
//!   encrypt <input>              - seal a file into the store
//!   decrypt <name> <output>      - recover a stored file
//!   revoke <name>...             - rotate stored files to a new group key
//!   inspect <name>               - show container and bundle details
//!   list                         - list stored files
//!   keygen group|custodian       - create key material
//!   config show                  - display current configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;

use knob_core::config::KnobConfig;
use knob_core::KnobError;
use knob_crypto::{CryptoResult, EncryptOptions, FormatVersion, GroupKey};
use knob_secrets::custodian::{PRIVATE_KEY_ENV, PUBLIC_KEY_ENV};
use knob_storage::SealedStore;

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "knob",
    version,
    about = "Revocable block encryption for shared files",
    long_about = "knob: encrypt files for a group so that revoking a member rewrites only a few blocks"
)]
struct Cli {
    /// Path to knob.toml configuration file
    #[arg(long, short = 'c', env = "KNOB_CONFIG", default_value = "knob.toml")]
    config: PathBuf,

    /// Log level or filter directive (overrides config; RUST_LOG is also honored)
    #[arg(long, env = "KNOB_LOG")]
    log: Option<String>,

    /// Log format (overrides config)
    #[arg(long, env = "KNOB_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    /// Store root directory (overrides storage.root)
    #[arg(long, env = "KNOB_STORE")]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum, PartialEq, Eq)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Encrypt a local file and store it under a name
    Encrypt {
        /// Local file to encrypt
        input: PathBuf,
        /// Stored name (default: input file name)
        #[arg(long, short = 'n')]
        name: Option<String>,
        /// Group key file
        #[arg(long)]
        group_key: Option<PathBuf>,
        /// Custodian public key (PEM)
        #[arg(long, env = PUBLIC_KEY_ENV)]
        custodian_pub: Option<PathBuf>,
        /// Number of super-blocks (overrides pipeline.super_block_count)
        #[arg(long)]
        super_blocks: Option<usize>,
        /// Container format: v1 or v2 (overrides pipeline.format)
        #[arg(long)]
        format: Option<String>,
        /// Replace an existing file with the same name
        #[arg(long)]
        force: bool,
    },

    /// Decrypt a stored file to a local path
    Decrypt {
        /// Stored name
        name: String,
        /// Local output path
        output: PathBuf,
        /// Group key file
        #[arg(long)]
        group_key: Option<PathBuf>,
        /// Custodian private key (PEM)
        #[arg(long, env = PRIVATE_KEY_ENV)]
        custodian_key: Option<PathBuf>,
    },

    /// Rotate stored files from the old group key to a new one
    ///
    /// Only the super-blocks of each file are rewritten. Distribute the new
    /// group key to remaining members before running this.
    Revoke {
        /// Stored names
        #[arg(required = true)]
        names: Vec<String>,
        /// Group key the files are currently under
        #[arg(long)]
        old_group_key: PathBuf,
        /// Group key to move the files to
        #[arg(long)]
        new_group_key: PathBuf,
        /// Custodian private key (PEM)
        #[arg(long, env = PRIVATE_KEY_ENV)]
        custodian_key: Option<PathBuf>,
    },

    /// Show container header and bundle details of a stored file
    Inspect {
        /// Stored name
        name: String,
        /// Custodian private key, to also show super-block positions
        #[arg(long)]
        custodian_key: Option<PathBuf>,
    },

    /// List stored files
    List,

    /// Generate key material
    Keygen {
        #[command(subcommand)]
        action: KeygenAction,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum KeygenAction {
    /// Write a new random group key
    Group {
        /// Output path
        path: PathBuf,
    },
    /// Write a new custodian RSA key pair into a directory
    Custodian {
        /// Output directory
        dir: PathBuf,
        /// Modulus size in bits
        #[arg(long, default_value_t = knob_secrets::custodian::DEFAULT_BITS)]
        bits: usize,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (mut config, config_found) = load_config(&cli.config)?;

    let level = cli.log.clone().unwrap_or_else(|| config.log.level.clone());
    let format = match cli.log_format {
        Some(format) => format,
        None if config.log.format == "json" => LogFormat::Json,
        None => LogFormat::Text,
    };
    init_logging(&level, format);

    if !config_found {
        tracing::warn!("config file not found: {}  (using defaults)", cli.config.display());
    }
    if let Some(root) = &cli.store {
        config.storage.root = root.clone();
    }

    match cli.command {
        Commands::Encrypt { input, name, group_key, custodian_pub, super_blocks, format, force } => {
            cmd_encrypt(
                &config,
                &input,
                name.as_deref(),
                group_key.as_deref(),
                custodian_pub.as_deref(),
                super_blocks,
                format.as_deref(),
                force,
            )
            .await
        }
        Commands::Decrypt { name, output, group_key, custodian_key } => {
            cmd_decrypt(&config, &name, &output, group_key.as_deref(), custodian_key.as_deref()).await
        }
        Commands::Revoke { names, old_group_key, new_group_key, custodian_key } => {
            cmd_revoke(&config, &names, &old_group_key, &new_group_key, custodian_key.as_deref()).await
        }
        Commands::Inspect { name, custodian_key } => {
            cmd_inspect(&config, &name, custodian_key.as_deref()).await
        }
        Commands::List => cmd_list(&config).await,
        Commands::Keygen { action: KeygenAction::Group { path } } => cmd_keygen_group(&path).await,
        Commands::Keygen { action: KeygenAction::Custodian { dir, bits } } => {
            cmd_keygen_custodian(&dir, bits).await
        }
        Commands::Config { action: ConfigAction::Show } => cmd_config_show(&config, &cli.config),
    }
}

// ── Config and logging ────────────────────────────────────────────────────────

/// Load knob.toml, falling back to defaults when the file does not exist.
fn load_config(path: &Path) -> Result<(KnobConfig, bool)> {
    match KnobConfig::load(path) {
        Ok(config) => Ok((config, true)),
        Err(KnobError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            Ok((KnobConfig::default(), false))
        }
        Err(e) => Err(e).with_context(|| format!("loading config: {}", path.display())),
    }
}

/// Logs go to stderr so decrypted output on stdout stays clean.
fn init_logging(level: &str, format: LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if std::env::var_os("KNOB_LOG").is_none() {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    } else {
        EnvFilter::new(level)
    };

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn open_store(config: &KnobConfig) -> Result<SealedStore> {
    let op = knob_storage::build_operator(&config.storage)?;
    Ok(SealedStore::new(op))
}

async fn load_custodian_public(config: &KnobConfig, flag: Option<&Path>) -> Result<knob_crypto::CustodianPublicKey> {
    let path = knob_secrets::resolve_key_path(
        flag,
        PUBLIC_KEY_ENV,
        config.keys.custodian_public_key.as_deref(),
    )?;
    knob_secrets::load_public_key(&path).await
}

async fn load_custodian_private(config: &KnobConfig, flag: Option<&Path>) -> Result<knob_crypto::CustodianPrivateKey> {
    let path = knob_secrets::resolve_key_path(
        flag,
        PRIVATE_KEY_ENV,
        config.keys.custodian_private_key.as_deref(),
    )?;
    knob_secrets::load_private_key(&path).await
}

/// Run a pipeline step on the blocking pool.
async fn run_crypto<T, F>(step: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> CryptoResult<T> + Send + 'static,
{
    let result = tokio::task::spawn_blocking(step)
        .await
        .map_err(|e| KnobError::Other(e.into()))?;
    Ok(result.map_err(KnobError::from)?)
}

// ── Progress helpers ──────────────────────────────────────────────────────────

fn make_progress_bar(total: u64, prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    if let Ok(style) = ProgressStyle::with_template("{prefix:.bold} [{bar:40.cyan/blue}] {pos}/{len} {msg}") {
        pb.set_style(style.progress_chars("=>-"));
    }
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn make_spinner(prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{prefix:.bold} {spinner} {msg}") {
        pb.set_style(style);
    }
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

// ── `knob encrypt` ────────────────────────────────────────────────────────────

#[allow(clippy::too_many_arguments)]
async fn cmd_encrypt(
    config: &KnobConfig,
    input: &Path,
    name: Option<&str>,
    group_key_flag: Option<&Path>,
    custodian_flag: Option<&Path>,
    super_blocks: Option<usize>,
    format: Option<&str>,
    force: bool,
) -> Result<()> {
    let name = match name {
        Some(n) => n.to_string(),
        None => input
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .with_context(|| format!("cannot derive a name from {}; pass --name", input.display()))?,
    };

    let options = EncryptOptions {
        super_blocks: super_blocks.unwrap_or(config.pipeline.super_block_count),
        format: format
            .unwrap_or(&config.pipeline.format)
            .parse::<FormatVersion>()?,
    };

    let store = open_store(config)?;
    if !force && store.exists(&name).await? {
        anyhow::bail!("{name} already exists in the store (use --force to replace it)");
    }

    let group = knob_secrets::find_group_key(group_key_flag, &config.keys).await?;
    tracing::debug!(source = %group.source, "using group key");
    let custodian = load_custodian_public(config, custodian_flag).await?;

    let plaintext = tokio::fs::read(input)
        .await
        .with_context(|| format!("reading {}", input.display()))?;
    let plaintext_len = plaintext.len() as u64;

    println!("Encrypting {} → {name}", input.display());
    let pb = make_spinner("encrypt");
    pb.set_message(format!("{} ({})", input.display(), fmt_bytes(plaintext_len)));

    let group_key = group.key;
    let sealed = run_crypto(move || knob_crypto::encrypt(&plaintext, &group_key, &custodian, options))
        .await
        .with_context(|| format!("encrypting {}", input.display()))?;

    pb.set_message("storing...");
    store.put_sealed(&name, &sealed.ciphertext, &sealed.bundle).await?;
    pb.finish_with_message("done".to_string());

    println!("  name:         {name}");
    println!("  format:       {}", options.format);
    println!("  plaintext:    {}", fmt_bytes(plaintext_len));
    println!("  ciphertext:   {}", fmt_bytes(sealed.ciphertext.len() as u64));
    println!("  super-blocks: {}", options.super_blocks);
    Ok(())
}

// ── `knob decrypt` ────────────────────────────────────────────────────────────

async fn cmd_decrypt(
    config: &KnobConfig,
    name: &str,
    output: &Path,
    group_key_flag: Option<&Path>,
    custodian_flag: Option<&Path>,
) -> Result<()> {
    let store = open_store(config)?;
    let group = knob_secrets::find_group_key(group_key_flag, &config.keys).await?;
    let custodian = load_custodian_private(config, custodian_flag).await?;

    let pb = make_spinner("decrypt");
    pb.set_message(format!("fetching {name}..."));
    let stored = store.get_sealed(name).await?;

    pb.set_message(format!("decrypting {name}..."));
    let group_key = group.key;
    let plaintext = run_crypto(move || {
        knob_crypto::decrypt(&stored.ciphertext, &stored.bundle, &group_key, &custodian)
    })
    .await
    .with_context(|| format!("decrypting {name}"))?;

    knob_secrets::atomic_write(output, &plaintext, knob_secrets::FileMode::Public).await?;
    pb.finish_with_message("done".to_string());

    println!("Decrypted:");
    println!("  local:  {}", output.display());
    println!("  bytes:  {}", fmt_bytes(plaintext.len() as u64));
    Ok(())
}

// ── `knob revoke` ─────────────────────────────────────────────────────────────

async fn cmd_revoke(
    config: &KnobConfig,
    names: &[String],
    old_path: &Path,
    new_path: &Path,
    custodian_flag: Option<&Path>,
) -> Result<()> {
    let store = open_store(config)?;
    let old_gk = std::sync::Arc::new(knob_secrets::load_group_key(old_path).await?);
    let new_gk = std::sync::Arc::new(knob_secrets::load_group_key(new_path).await?);
    if old_gk.as_bytes() == new_gk.as_bytes() {
        anyhow::bail!("old and new group keys are identical");
    }
    let custodian = std::sync::Arc::new(load_custodian_private(config, custodian_flag).await?);

    let pb = make_progress_bar(names.len() as u64, "revoke");

    // Rotate everything in memory first so a failure leaves the store untouched
    let mut rotated = Vec::with_capacity(names.len());
    for name in names {
        pb.set_message(name.clone());
        let stored = store.get_sealed(name).await?;
        let previous = stored.ciphertext.clone();
        let revoked = rotate_one(stored, old_gk.clone(), new_gk.clone(), custodian.clone())
            .await
            .with_context(|| format!("revoking {name}"))?;
        rotated.push((name, previous, revoked));
        pb.inc(1);
    }

    pb.set_message("writing...");
    let replacements: Vec<_> = rotated
        .iter()
        .map(|(name, previous, revoked)| knob_storage::Replacement {
            name: name.as_str(),
            previous,
            next: &revoked.ciphertext,
        })
        .collect();
    if let Err(e) = store.replace_all(&replacements).await {
        pb.abandon_with_message("failed".to_string());
        return Err(e.context("revocation not applied"));
    }
    pb.finish_with_message("done".to_string());

    println!("Revocation complete:");
    for (name, _, revoked) in &rotated {
        println!("  {name}: {} super-blocks rewritten", revoked.report.touched.len());
    }
    Ok(())
}

async fn rotate_one(
    stored: knob_storage::StoredFile,
    old_gk: std::sync::Arc<GroupKey>,
    new_gk: std::sync::Arc<GroupKey>,
    custodian: std::sync::Arc<knob_crypto::CustodianPrivateKey>,
) -> Result<knob_crypto::Revoked> {
    run_crypto(move || {
        let session_key = knob_crypto::open_session_key(&stored.bundle, &custodian)?;
        knob_crypto::revoke(
            &stored.ciphertext,
            &old_gk,
            &new_gk,
            &stored.bundle.meta_index,
            &session_key,
        )
    })
    .await
}

// ── `knob inspect` / `knob list` ──────────────────────────────────────────────

async fn cmd_inspect(config: &KnobConfig, name: &str, custodian_flag: Option<&Path>) -> Result<()> {
    let store = open_store(config)?;
    let header = store.get_header(name).await?;
    let bundle = store.get_bundle(name).await?;
    let blocks = header.block_count()?;

    println!("File: {name}");
    println!("  format:        {}", header.version);
    println!("  plaintext:     {}", fmt_bytes(header.plaintext_len));
    println!("  blocks:        {blocks}");
    println!("  bundle:        v{}", bundle.version);
    println!("  metaIndex:     {} bytes", bundle.meta_index.len());
    println!("  metaSGX:       {} bytes (RSA-{})", bundle.meta_sgx.len(), bundle.meta_sgx.len() * 8);

    if let Some(flag) = custodian_flag {
        let custodian = load_custodian_private(config, Some(flag)).await?;
        let meta_index = bundle.meta_index.clone();
        let index = run_crypto(move || {
            let session_key = knob_crypto::open_session_key(&bundle, &custodian)?;
            knob_crypto::decrypt_index(&meta_index, &session_key)
        })
        .await?;
        println!("  super-blocks:  {:?}", index.positions());
    }
    Ok(())
}

async fn cmd_list(config: &KnobConfig) -> Result<()> {
    let store = open_store(config)?;
    let names = store.list().await?;
    if names.is_empty() {
        println!("(store is empty: {})", config.storage.root.display());
    }
    for name in names {
        println!("{name}");
    }
    Ok(())
}

// ── `knob keygen` ─────────────────────────────────────────────────────────────

async fn cmd_keygen_group(path: &Path) -> Result<()> {
    knob_secrets::create_group_key(path).await?;
    println!("Group key written to {}", path.display());
    println!("Share it with every group member over a secure channel.");
    Ok(())
}

async fn cmd_keygen_custodian(dir: &Path, bits: usize) -> Result<()> {
    let pb = make_spinner("keygen");
    pb.set_message(format!("generating RSA-{bits} key pair..."));
    let key = knob_secrets::generate_custodian(bits).await?;
    let paths = knob_secrets::save_custodian(dir, &key).await?;
    pb.finish_with_message("done".to_string());

    println!("Custodian key pair:");
    println!("  private: {} (keep offline)", paths.private_key.display());
    println!("  public:  {}", paths.public_key.display());
    Ok(())
}

// ── `knob config show` ────────────────────────────────────────────────────────

fn cmd_config_show(config: &KnobConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

fn fmt_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
