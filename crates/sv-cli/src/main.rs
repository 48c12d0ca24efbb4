//! sv: splitvault command-line interface
//!
//! Account:
//!   init                      - create the account ($LOGIN_META on every backend)
//!   login-check               - verify the password and list shared folders
//!   status                    - backend authentication status
//!
//! Items (main session, or a shared one with --shared NAME):
//!   ls, find, put, get, open, rm, mkdir, rename, cp, mv, repair, integrity
//!
//! Shared folders:
//!   share create|list|sync|members|leave|delete, watch

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use secrecy::{ExposeSecret, SecretString};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use sv_core::config::SvConfig;
use sv_core::{names, ItemKind, ListedItem};
use sv_session::{Gateway, ProgressFn, Scope};
use sv_storage::CloudBackend;

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "sv",
    version,
    about = "splitvault: encrypted storage split across cloud accounts",
    long_about = "sv: encrypt files, split them into shares and spread the shares over several cloud backends"
)]
struct Cli {
    /// Path to sv.toml (default: ~/.config/splitvault/sv.toml)
    #[arg(long, short = 'c', env = "SV_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Log level or filter directive (overrides app.log_level)
    #[arg(long, env = "SV_LOG", global = true)]
    log: Option<String>,

    /// Log format (overrides app.log_format)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    /// Act on this shared folder instead of the main session
    #[arg(long, short = 's', global = true)]
    shared: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create an account on the configured backends
    Init {
        /// Default cipher (aes, xchacha20, null)
        #[arg(long)]
        encrypt: Option<String>,
        /// Default split codec (shamir, none)
        #[arg(long)]
        split: Option<String>,
    },

    /// Check the password and show what the account can see
    #[command(name = "login-check")]
    LoginCheck,

    /// Show backend authentication status
    Status,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// List a folder
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },

    /// Find items whose name contains NEEDLE
    Find {
        needle: String,
        /// Folder to search below
        #[arg(long, default_value = "/")]
        under: String,
    },

    /// Upload a local file or directory tree
    Put {
        local: PathBuf,
        /// Remote folder to upload into
        #[arg(default_value = "/")]
        dir: String,
    },

    /// Download a file or folder
    Get {
        path: String,
        /// Local destination folder (default: app.download_dir)
        dest: Option<PathBuf>,
    },

    /// Decrypt a file into scratch space and print its local path
    Open { path: String },

    /// Delete a file or folder
    Rm { path: String },

    /// Create a folder
    Mkdir { path: String },

    /// Rename a file or folder in place
    Rename { path: String, new_name: String },

    /// Copy into another folder
    Cp { src: String, dest_dir: String },

    /// Move into another folder
    Mv { src: String, dest_dir: String },

    /// Rewrite missing shares of a file
    Repair { path: String },

    /// Compare the copies of a replicated object by hash
    Integrity {
        #[arg(default_value = "$META")]
        name: String,
    },

    /// Shared folder management
    Share {
        #[command(subcommand)]
        action: ShareAction,
    },

    /// Report newly shared folders until interrupted
    Watch,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (defaults merged with the file)
    Show,
}

#[derive(Subcommand, Debug)]
enum ShareAction {
    /// Create a shared folder and invite EMAILS
    Create {
        name: String,
        #[arg(required = true)]
        emails: Vec<String>,
        #[arg(long)]
        encrypt: Option<String>,
        #[arg(long)]
        split: Option<String>,
    },
    /// List shared folders and their key state
    List,
    /// Discover shared folders and advance pending key exchanges
    Sync,
    /// Show the members of a shared folder
    Members { name: String },
    /// Stop being a member of a shared folder
    Leave { name: String },
    /// Delete a shared folder you own
    Delete { name: String },
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(SvConfig::default_path);
    let config = SvConfig::load(&config_path)
        .with_context(|| format!("loading config: {}", config_path.display()))?;

    let level = cli.log.clone().unwrap_or_else(|| config.app.log_level.clone());
    let format = cli.log_format.clone().unwrap_or(match config.app.log_format.as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    });
    init_logging(&level, &format);
    debug!(config = %config_path.display(), "sv starting");

    if let Commands::Config { action: ConfigAction::Show } = &cli.command {
        return cmd_config_show(&config, &config_path);
    }

    let gw = Gateway::new(config).context("setting up backends")?;
    let scope = Scope::from_option(cli.shared.as_deref());

    match cli.command {
        Commands::Init { encrypt, split } => cmd_init(&gw, encrypt.as_deref(), split.as_deref()).await,
        Commands::LoginCheck => cmd_login_check(&gw).await,
        Commands::Status => cmd_status(&gw).await,
        Commands::Config { .. } => Ok(()),
        Commands::Share { action } => cmd_share(&gw, action).await,
        Commands::Watch => cmd_watch(&gw).await,
        item => {
            login(&gw).await?;
            cmd_item(&gw, &scope, item).await
        }
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

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

// ── Password handling ─────────────────────────────────────────────────────────

/// `SV_PASSWORD` if set, otherwise an interactive prompt.
fn read_password(confirm: bool) -> Result<SecretString> {
    if let Ok(p) = std::env::var("SV_PASSWORD") {
        return Ok(SecretString::from(p));
    }
    let first = rpassword::prompt_password("Password: ").context("reading password")?;
    if confirm {
        let second = rpassword::prompt_password("Repeat password: ").context("reading password")?;
        if first != second {
            anyhow::bail!("passwords do not match");
        }
    }
    Ok(SecretString::from(first))
}

async fn login(gw: &Gateway) -> Result<()> {
    let password = read_password(false)?;
    if password.expose_secret().is_empty() {
        anyhow::bail!("empty password");
    }
    gw.app_authenticate(&password).await.context("logging in")?;
    info!("logged in");
    Ok(())
}

// ── Progress bar helpers ──────────────────────────────────────────────────────

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template("{prefix:.bold} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-")
}

fn make_progress(prefix: &str) -> (ProgressBar, ProgressFn) {
    let pb = ProgressBar::new(0);
    pb.set_style(bar_style());
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));

    let pb_clone = pb.clone();
    let progress: ProgressFn = Box::new(move |done, total, msg| {
        pb_clone.set_length(total);
        pb_clone.set_position(done);
        pb_clone.set_message(msg.to_string());
    });
    (pb, progress)
}

// ── `sv init` / `sv login-check` / `sv status` ────────────────────────────────

async fn cmd_init(gw: &Gateway, encrypt: Option<&str>, split: Option<&str>) -> Result<()> {
    if gw.account_exists().await.context("probing for an account")? {
        anyhow::bail!("an account already exists on these backends; use `sv login-check`");
    }
    let password = read_password(true)?;
    gw.create_account(&password, encrypt, split)
        .await
        .context("creating account")?;

    let cfg = &gw.config().session;
    println!("Account created:");
    println!("  session:  {}", cfg.name);
    println!("  encrypt:  {}", encrypt.unwrap_or(cfg.default_encrypt.as_str()));
    println!("  split:    {}", split.unwrap_or(cfg.default_split.as_str()));
    println!("  backends: {}", backend_tags(gw).join(", "));
    Ok(())
}

async fn cmd_login_check(gw: &Gateway) -> Result<()> {
    login(gw).await?;
    println!("Password ok ({} backends)", gw.backends().len());
    print_shared(gw);
    Ok(())
}

async fn cmd_status(gw: &Gateway) -> Result<()> {
    for status in gw.authenticate().await {
        let state = match (&status.error, status.authenticated) {
            (Some(e), _) => format!("FAILED: {e}"),
            (None, true) => "ok".to_string(),
            (None, false) => "not authenticated".to_string(),
        };
        println!("  {:<8} {:<28} {}", status.tag, status.email, state);
    }
    let exists = gw.account_exists().await.context("probing for an account")?;
    println!("  account: {}", if exists { "present" } else { "none (run `sv init`)" });
    Ok(())
}

fn backend_tags(gw: &Gateway) -> Vec<String> {
    gw.backends().iter().map(|b| b.name().to_string()).collect()
}

// ── `sv config show` ──────────────────────────────────────────────────────────

fn cmd_config_show(config: &SvConfig, config_path: &Path) -> Result<()> {
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

// ── Item commands ─────────────────────────────────────────────────────────────

/// Look `path` up in its parent's listing.
async fn stat(gw: &Gateway, scope: &Scope, path: &str) -> Result<ListedItem> {
    let path = names::normalize(path);
    if path == names::ROOT {
        return Ok(ListedItem {
            name: String::new(),
            path,
            kind: ItemKind::Folder,
        });
    }
    let parent = names::parent(&path);
    gw.get_items_in_folder(scope, &parent)
        .await
        .with_context(|| format!("listing {parent}"))?
        .into_iter()
        .find(|item| item.path == path)
        .with_context(|| format!("not found: {path}"))
}

async fn cmd_item(gw: &Gateway, scope: &Scope, command: Commands) -> Result<()> {
    match command {
        Commands::Ls { path } => {
            let items = gw
                .get_items_in_folder(scope, &path)
                .await
                .with_context(|| format!("listing {path}"))?;
            print_items(&items);
        }
        Commands::Find { needle, under } => {
            let items = gw
                .search_items_by_name(scope, &needle, &under)
                .await
                .with_context(|| format!("searching {under}"))?;
            print_items(&items);
        }
        Commands::Put { local, dir } => cmd_put(gw, scope, &local, &dir).await?,
        Commands::Get { path, dest } => cmd_get(gw, scope, &path, dest.as_deref()).await?,
        Commands::Open { path } => {
            let local = gw.open_file(scope, &path).await.with_context(|| format!("opening {path}"))?;
            println!("{}", local.display());
        }
        Commands::Rm { path } => {
            let item = stat(gw, scope, &path).await?;
            match item.kind {
                ItemKind::File => gw.delete_file(scope, &item.path).await,
                ItemKind::Folder => gw.delete_folder(scope, &item.path).await,
            }
            .with_context(|| format!("deleting {}", item.path))?;
            println!("Deleted {}", item.path);
        }
        Commands::Mkdir { path } => {
            let path = names::normalize(&path);
            let created = gw
                .create_folder(scope, &names::parent(&path), &names::basename(&path))
                .await
                .with_context(|| format!("creating {path}"))?;
            println!("Created {}", created.path);
        }
        Commands::Rename { path, new_name } => {
            let renamed = gw
                .rename_item(scope, &path, &new_name)
                .await
                .with_context(|| format!("renaming {path}"))?;
            println!("{path} → {}", renamed.path);
        }
        Commands::Cp { src, dest_dir } => {
            let copied = gw
                .copy_item(scope, &src, &dest_dir)
                .await
                .with_context(|| format!("copying {src}"))?;
            println!("{src} → {copied}");
        }
        Commands::Mv { src, dest_dir } => {
            let moved = gw
                .move_item(scope, &src, &dest_dir)
                .await
                .with_context(|| format!("moving {src}"))?;
            println!("{src} → {moved}");
        }
        Commands::Repair { path } => {
            let report = gw.repair_file(scope, &path).await.with_context(|| format!("repairing {path}"))?;
            println!("{}: {}/{} shares present", report.path, report.present, report.expected);
            if report.rewritten.is_empty() {
                println!("  nothing to repair");
            } else {
                println!("  rewritten on: {}", report.rewritten.join(", "));
            }
        }
        Commands::Integrity { name } => {
            let report = gw
                .check_integrity(scope, &name)
                .await
                .with_context(|| format!("checking {name}"))?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.is_consistent() {
                std::process::exit(2);
            }
        }
        other => anyhow::bail!("not an item command: {other:?}"),
    }
    Ok(())
}

async fn cmd_put(gw: &Gateway, scope: &Scope, local: &Path, dir: &str) -> Result<()> {
    if local.is_file() {
        let transfer = gw
            .upload_file(scope, local, dir)
            .await
            .with_context(|| format!("uploading {}", local.display()))?;
        println!("Uploaded {}", transfer.path);
        println!("  bytes:  {}", fmt_bytes(transfer.bytes));
        println!("  shares: {}/{}", transfer.shares_written, transfer.shares_expected);
        for (backend, error) in &transfer.failed {
            println!("  missed: {backend} ({error})");
        }
    } else if local.is_dir() {
        let (pb, progress) = make_progress("put");
        let result = gw
            .upload_folder(scope, local, dir, Some(&progress))
            .await
            .with_context(|| format!("uploading tree: {}", local.display()));
        pb.finish_and_clear();
        let result = result?;
        println!("Uploaded {}", result.root);
        println!("  files:  {} ({})", result.files.len(), fmt_bytes(result.bytes));
        let partial = result.files.iter().filter(|t| !t.all_ok()).count();
        if partial > 0 {
            println!("  partial: {partial} files missed a backend (run `sv repair`)");
        }
        for (path, error) in &result.failed {
            println!("  failed: {} ({error})", path.display());
        }
        if !result.failed.is_empty() {
            anyhow::bail!("{} files were not uploaded", result.failed.len());
        }
    } else {
        anyhow::bail!("path not found or not a file/directory: {}", local.display());
    }
    Ok(())
}

async fn cmd_get(gw: &Gateway, scope: &Scope, path: &str, dest: Option<&Path>) -> Result<()> {
    let item = stat(gw, scope, path).await?;
    let local = match item.kind {
        ItemKind::File => gw
            .download_file(scope, &item.path, dest)
            .await
            .with_context(|| format!("downloading {}", item.path))?,
        ItemKind::Folder => {
            let (pb, progress) = make_progress("get");
            let result = gw
                .download_folder(scope, &item.path, dest, Some(&progress))
                .await
                .with_context(|| format!("downloading {}", item.path));
            pb.finish_and_clear();
            result?
        }
    };
    println!("{} → {}", item.path, local.display());
    Ok(())
}

fn print_items(items: &[ListedItem]) {
    for item in items {
        match item.kind {
            ItemKind::Folder => println!("{}/", item.path),
            ItemKind::File => println!("{}", item.path),
        }
    }
}

// ── `sv share` ────────────────────────────────────────────────────────────────

async fn cmd_share(gw: &Gateway, action: ShareAction) -> Result<()> {
    login(gw).await?;
    match action {
        ShareAction::Create {
            name,
            emails,
            encrypt,
            split,
        } => {
            let info = gw
                .create_shared_session(&name, &emails, encrypt.as_deref(), split.as_deref())
                .await
                .with_context(|| format!("creating shared folder {name}"))?;
            println!("Shared {} with {}", info.name, emails.join(", "));
            println!("Members get access after their next `sv share sync` and yours.");
        }
        ShareAction::List => print_shared(gw),
        ShareAction::Sync => {
            let folders = gw.refresh_shared_sessions().await.context("syncing shared folders")?;
            for info in &folders {
                if info.state.has_key() {
                    let served = gw.share_keys(&info.name).await.unwrap_or_default();
                    if !served.is_empty() {
                        println!("{}: key sent to {}", info.name, served.join(", "));
                    }
                }
            }
            print_shared(gw);
        }
        ShareAction::Members { name } => {
            for member in gw.shared_members(&name).await.with_context(|| format!("members of {name}"))? {
                println!("{member}");
            }
        }
        ShareAction::Leave { name } => {
            gw.leave_shared_folder(&name).await.with_context(|| format!("leaving {name}"))?;
            println!("Left {name}");
        }
        ShareAction::Delete { name } => {
            gw.delete_shared_folder(&name).await.with_context(|| format!("deleting {name}"))?;
            println!("Deleted shared folder {name}");
        }
    }
    Ok(())
}

fn print_shared(gw: &Gateway) {
    let folders = gw.get_shared_folders();
    if folders.is_empty() {
        println!("No shared folders");
        return;
    }
    for info in folders {
        let state = serde_json::to_value(info.state)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        println!("  {:<24} {}", info.name, state);
    }
}

// ── `sv watch` ────────────────────────────────────────────────────────────────

async fn cmd_watch(gw: &Gateway) -> Result<()> {
    if !gw.config().sync.enabled {
        anyhow::bail!("shared folder polling is disabled (sync.enabled = false)");
    }
    login(gw).await?;
    print_shared(gw);
    gw.start_watcher(Arc::new(|found: Vec<String>| {
        for name in found {
            println!("new shared folder: {name} (run `sv share sync`)");
        }
    }))
    .context("starting watcher")?;
    println!(
        "Watching every {}s. Press Ctrl-C to stop.",
        gw.config().sync.poll_interval_secs
    );
    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    gw.stop_watcher().await;
    Ok(())
}

// ── Utilities ─────────────────────────────────────────────────────────────────

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
        format!("{bytes} B")
    }
}
