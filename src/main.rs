use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use kioku::channels::sidecar::{find_sidecar_dir, start_sidecar, SidecarClient};
use kioku::cleanup::CleanupScheduler;
use kioku::config::{kioku_dir, Config, ConfigHandle};
use kioku::error::{KiokuError, Result};
use kioku::gateway::Gateway;
use kioku::media::store;
use kioku::media::transcode::Transcoder;
use kioku::pipeline::Pipeline;
use kioku::stats::Stats;

#[derive(Parser)]
#[command(name = "kioku", version, about = "View-once media recovery runtime")]
struct Cli {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize default config and media directory
    Init,
    /// Start the runtime (sidecar, pipeline, control API)
    Start,
    /// Stop the running runtime
    Stop,
    /// Show runtime status
    Status,
    /// Show recent logs
    Logs {
        /// Number of lines to show
        #[arg(short, long, default_value = "50")]
        lines: usize,
    },
    /// Show pipeline statistics
    Stats,
    /// Evict stale media artifacts
    Cleanup {
        /// Age threshold in hours (defaults to handler.max_temp_age_hours)
        #[arg(long)]
        hours: Option<u64>,
    },
    /// Config management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Open config in editor
    Edit,
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // File + stderr logging for `start`, stderr only otherwise
    init_tracing(matches!(&cli.command, Commands::Start))?;

    match cli.command {
        Commands::Init => cmd_init()?,
        Commands::Start => cmd_start(&cli.config).await?,
        Commands::Stop => cmd_stop()?,
        Commands::Status => cmd_status().await?,
        Commands::Logs { lines } => cmd_logs(lines)?,
        Commands::Stats => cmd_stats(&cli.config).await?,
        Commands::Cleanup { hours } => cmd_cleanup(&cli.config, hours).await?,
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let path = cli.config.unwrap_or_else(Config::default_path);
                let content = std::fs::read_to_string(&path)?;
                println!("{content}");
            }
            ConfigAction::Edit => {
                let path = cli.config.unwrap_or_else(Config::default_path);
                let editor = std::env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());
                std::process::Command::new(editor).arg(&path).status()?;
            }
        },
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn pid_file_path() -> PathBuf {
    kioku_dir().join("kioku.pid")
}

fn log_file_path() -> PathBuf {
    kioku_dir().join("kioku.log")
}

fn load_config(path: &Option<PathBuf>) -> Result<Config> {
    let config_path = path.clone().unwrap_or_else(Config::default_path);
    if !config_path.exists() {
        return Err(KiokuError::Config(format!(
            "Config not found at {}. Run `kioku init` first.",
            config_path.display()
        )));
    }
    Config::load(&config_path)
}

fn is_process_running(pid: u32) -> bool {
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Read PID and bind address from the PID file.
/// Format: line 1 = PID, line 2 = bind address.
fn read_pid_file() -> Option<(u32, String)> {
    let content = std::fs::read_to_string(pid_file_path()).ok()?;
    let mut lines = content.lines();
    let pid: u32 = lines.next()?.trim().parse().ok()?;
    let bind = lines.next().unwrap_or("127.0.0.1:3700").trim().to_string();
    Some((pid, bind))
}

fn init_tracing(with_file: bool) -> std::result::Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if with_file {
            "info".into()
        } else {
            "warn".into()
        }
    });

    let stderr_layer = tracing_subscriber::fmt::layer();

    if with_file {
        let dir = kioku_dir();
        let _ = std::fs::create_dir_all(&dir);
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file_path())?;

        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(std::sync::Mutex::new(file));

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }

    Ok(())
}

async fn api_get(bind: &str, token: Option<&str>, path: &str) -> Result<reqwest::Response> {
    let mut req = reqwest::Client::new().get(format!("http://{bind}{path}"));
    if let Some(token) = token {
        req = req.header("Authorization", format!("Bearer {token}"));
    }
    Ok(req.send().await?)
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn cmd_init() -> Result<()> {
    let dir = kioku_dir();
    let config_path = dir.join("config.toml");
    let media_dir = dir.join("media");

    std::fs::create_dir_all(&media_dir)?;

    if !config_path.exists() {
        std::fs::write(&config_path, Config::default_toml())?;
        println!("Created config at {}", config_path.display());
    } else {
        println!("Config already exists at {}", config_path.display());
    }

    println!("Media directory at {}", media_dir.display());
    println!("Run `kioku start` to launch the runtime.");
    Ok(())
}

async fn cmd_start(config_path: &Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path)?;

    // Check if already running
    if let Some((pid, _)) = read_pid_file() {
        if is_process_running(pid) {
            return Err(KiokuError::Config(format!(
                "kioku is already running (PID {pid}). Use `kioku stop` first."
            )));
        }
        // Stale PID file
        let _ = std::fs::remove_file(pid_file_path());
    }

    let bind_addr = config.gateway.bind.clone();
    let api_token = config.gateway.api_token.clone();
    let owner_id = config.channel.owner_id.clone();
    let resolved_path = config_path.clone().unwrap_or_else(Config::default_path);

    // Transport sidecar
    let sidecar_dir = find_sidecar_dir(config.channel.sidecar_dir.as_deref().map(Path::new))?;
    let mut sidecar = start_sidecar(&sidecar_dir, config.channel.sidecar_port).await?;
    let client = Arc::new(SidecarClient::new(config.channel.sidecar_port)?);

    // Pipeline wiring
    let handle = ConfigHandle::new(config.clone(), Some(resolved_path));
    let stats = Arc::new(Stats::new());
    let transcoder = Transcoder::new(&config.transcode);
    let pipeline = Arc::new(Pipeline::new(
        client.clone(),
        handle.clone(),
        stats.clone(),
        transcoder,
    ));
    let gateway = Arc::new(Gateway::new(
        pipeline,
        client.clone(),
        handle.clone(),
        stats.clone(),
        owner_id,
    ));

    // Inbound events: sidecar long-poll → gateway, one task per envelope
    let (inbound_tx, mut inbound_rx) = mpsc::channel(64);
    let running = Arc::new(AtomicBool::new(true));

    let event_client = (*client).clone();
    let event_running = running.clone();
    tokio::spawn(async move {
        event_client.run_event_loop(inbound_tx, event_running).await;
    });

    let gw = gateway.clone();
    tokio::spawn(async move {
        while let Some(envelope) = inbound_rx.recv().await {
            let gw = gw.clone();
            tokio::spawn(async move {
                gw.handle_envelope(envelope).await;
            });
        }
    });

    // Periodic temp-store eviction (sweeps once immediately)
    let scheduler = CleanupScheduler::spawn(handle.clone());

    // Control API
    let state = Arc::new(kioku::api::AppState {
        stats,
        config: handle,
        api_token,
    });
    let app = kioku::api::router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| KiokuError::Config(format!("Failed to bind to {bind_addr}: {e}")))?;
    let local_addr = listener
        .local_addr()
        .map_err(|e| KiokuError::Config(format!("Failed to get local address: {e}")))?;

    // Write PID file (PID + bind address)
    let pid = std::process::id();
    std::fs::write(pid_file_path(), format!("{pid}\n{local_addr}\n"))?;

    println!("kioku v{} started", env!("CARGO_PKG_VERSION"));
    println!("  Bind:    {local_addr}");
    println!("  Sidecar: port {}", sidecar.port());
    println!("  PID:     {pid}");
    println!("  Log:     {}", log_file_path().display());
    println!();
    println!("Press Ctrl+C to stop.");

    let shutdown = async {
        tokio::signal::ctrl_c().await.ok();
        println!("\nShutting down...");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| KiokuError::Config(format!("Server error: {e}")))?;

    running.store(false, Ordering::SeqCst);
    scheduler.stop().await;
    sidecar.stop().await?;
    info!("runtime stopped");

    let _ = std::fs::remove_file(pid_file_path());
    println!("kioku stopped.");
    Ok(())
}

fn cmd_stop() -> Result<()> {
    let Some((pid, _)) = read_pid_file() else {
        println!("kioku is not running (no PID file found).");
        return Ok(());
    };

    if !is_process_running(pid) {
        let _ = std::fs::remove_file(pid_file_path());
        println!("kioku is not running (stale PID file for {pid}, cleaned up).");
        return Ok(());
    }

    let status = std::process::Command::new("kill")
        .args(["-TERM", &pid.to_string()])
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status();

    match status {
        Ok(s) if s.success() => {
            println!("Sent stop signal to kioku (PID {pid}).");
            for _ in 0..10 {
                std::thread::sleep(std::time::Duration::from_millis(200));
                if !is_process_running(pid) {
                    let _ = std::fs::remove_file(pid_file_path());
                    println!("kioku stopped.");
                    return Ok(());
                }
            }
            println!("Process {pid} still running. It may take a moment to shut down.");
        }
        _ => {
            println!("Failed to send stop signal to PID {pid}.");
        }
    }

    Ok(())
}

async fn cmd_status() -> Result<()> {
    let Some((pid, bind)) = read_pid_file() else {
        println!("kioku is not running.");
        return Ok(());
    };

    if !is_process_running(pid) {
        let _ = std::fs::remove_file(pid_file_path());
        println!("kioku is not running (stale PID file, cleaned up).");
        return Ok(());
    }

    match api_get(&bind, None, "/health").await {
        Ok(resp) if resp.status().is_success() => {
            println!("kioku is running (PID {pid}) on {bind}");
            if let Ok(body) = resp.text().await {
                println!("  Health: {body}");
            }
        }
        _ => {
            println!("kioku process is running (PID {pid}) but health check failed on {bind}");
        }
    }

    Ok(())
}

fn cmd_logs(num_lines: usize) -> Result<()> {
    let path = log_file_path();

    if !path.exists() {
        println!("No log file found at {}", path.display());
        println!("Start the runtime first: kioku start");
        return Ok(());
    }

    let content = std::fs::read_to_string(&path)?;
    let lines: Vec<&str> = content.lines().collect();
    let start = lines.len().saturating_sub(num_lines);

    for line in &lines[start..] {
        println!("{line}");
    }

    if start > 0 {
        println!(
            "\n(Showing last {} of {} lines)",
            lines.len() - start,
            lines.len()
        );
    }

    Ok(())
}

async fn cmd_stats(config_path: &Option<PathBuf>) -> Result<()> {
    let Some((pid, bind)) = read_pid_file() else {
        println!("kioku is not running.");
        return Ok(());
    };
    if !is_process_running(pid) {
        println!("kioku is not running (stale PID file).");
        return Ok(());
    }

    let token = load_config(config_path)
        .ok()
        .and_then(|c| c.gateway.api_token);
    let resp = api_get(&bind, token.as_deref(), "/api/v1/stats").await?;
    if !resp.status().is_success() {
        return Err(KiokuError::Config(format!(
            "stats request failed with status {}",
            resp.status()
        )));
    }

    let snapshot: kioku::stats::StatsSnapshot = resp.json().await?;
    println!("{}", snapshot.render());
    Ok(())
}

async fn cmd_cleanup(config_path: &Option<PathBuf>, hours: Option<u64>) -> Result<()> {
    let config = load_config(config_path)?;

    // Prefer the running daemon so the sweep and pipeline share one view
    // of the directory; fall back to a local sweep otherwise.
    if let Some((pid, bind)) = read_pid_file() {
        if is_process_running(pid) {
            let mut req = reqwest::Client::new().post(format!("http://{bind}/api/v1/cleanup"));
            if let Some(token) = &config.gateway.api_token {
                req = req.header("Authorization", format!("Bearer {token}"));
            }
            let resp = req
                .json(&serde_json::json!({ "hours": hours }))
                .send()
                .await?;
            if resp.status().is_success() {
                let body: kioku::api::CleanupResponse = resp.json().await?;
                println!("Removed {} stale artifact(s).", body.removed);
                return Ok(());
            }
            println!("Cleanup via API failed ({}), sweeping locally.", resp.status());
        }
    }

    let cfg = config.handler;
    let max_age = hours
        .map(|h| std::time::Duration::from_secs(h * 3600))
        .unwrap_or_else(|| cfg.max_temp_age());
    let removed = store::evict(&cfg.temp_dir_path(), max_age)?;
    println!("Removed {removed} stale artifact(s).");
    Ok(())
}
