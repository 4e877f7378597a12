//! Mend CLI - command-line client for the Mend platform.
//!
//! ## Commands
//!
//! - `init`: profile the repository and write local configuration
//! - `crawl`: trigger a crawl for the configured project
//! - `status`: show a crawl job's status
//! - `issues`: list issues with filters
//! - `stats`: summarize the project's health trend
//! - `watch`: watch the working tree and trigger crawls on change
//! - `export`: dump issues to a file
//! - `config`: print the resolved configuration
//! - `clean`: remove local state
//!
//! Exit codes: 0 success, 1 generic error, 2 configuration error,
//! 3 budget/quota, 4 authentication, 5 remote store unavailable.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tracing::Level;

const EXIT_OK: i32 = 0;
const EXIT_GENERIC: i32 = 1;
const EXIT_CONFIG: i32 = 2;
const EXIT_QUOTA: i32 = 3;
const EXIT_AUTH: i32 = 4;
const EXIT_REMOTE: i32 = 5;

#[derive(Parser)]
#[command(name = "mend")]
#[command(author = "Mendworks Engineering")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Autonomous code-quality platform client", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Daemon base URL
    #[arg(long, global = true, env = "MEND_API", default_value = "http://127.0.0.1:8080")]
    api: String,

    /// Project id (defaults to the one in .mend/config.toml)
    #[arg(long, global = true)]
    project: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Profile the repository and write .mend/config.toml
    Init {
        /// Path to initialize (default: current directory)
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Project id assigned by the platform
        #[arg(long)]
        project_id: Option<String>,
    },

    /// Trigger a crawl
    Crawl {
        /// Apply safe fixes automatically
        #[arg(long)]
        auto_fix: bool,

        /// Cap on files scanned this crawl
        #[arg(long)]
        budget: Option<usize>,
    },

    /// Show a crawl job's status
    Status {
        /// Job id returned by `mend crawl`
        job_id: String,
    },

    /// List issues
    Issues {
        /// Filter by severity (critical|high|medium|low)
        #[arg(long)]
        severity: Option<String>,

        /// Filter by issue kind
        #[arg(long = "type")]
        kind: Option<String>,

        /// Filter by review status
        #[arg(long)]
        status: Option<String>,

        /// Output format
        #[arg(long, default_value = "text")]
        format: Format,

        /// Write output to a file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,

        /// Maximum rows
        #[arg(long, default_value = "50")]
        limit: usize,
    },

    /// Summarize the health trend
    Stats {
        /// Range, e.g. 7d or 24h
        #[arg(long, default_value = "7d")]
        range: String,
    },

    /// Watch the working tree and crawl on change
    Watch {
        /// Directory to watch (default: current directory)
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Apply safe fixes automatically on each crawl
        #[arg(long)]
        auto_fix: bool,
    },

    /// Export issues to a file
    Export {
        /// Output path
        #[arg(long)]
        output: PathBuf,

        /// Output format
        #[arg(long, default_value = "json")]
        format: Format,
    },

    /// Print the resolved configuration
    Config,

    /// Remove local state (.mend directory)
    Clean,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum Format {
    Json,
    Csv,
    Text,
}

/// Local configuration persisted by `mend init`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct LocalConfig {
    project_id: Option<String>,
    api: Option<String>,
    stack: Vec<String>,
}

impl LocalConfig {
    fn path() -> PathBuf {
        PathBuf::from(".mend/config.toml")
    }

    fn load() -> Option<Self> {
        let raw = std::fs::read_to_string(Self::path()).ok()?;
        // The file is tiny; JSON inside a .toml-named file would be wrong,
        // so parse the simple key=value format we write.
        let mut config = LocalConfig::default();
        for line in raw.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim().trim_matches('"');
            match key.trim() {
                "project_id" => config.project_id = Some(value.to_string()),
                "api" => config.api = Some(value.to_string()),
                _ => {}
            }
        }
        Some(config)
    }

    fn save(&self) -> Result<()> {
        std::fs::create_dir_all(".mend")?;
        let mut out = String::new();
        if let Some(project_id) = &self.project_id {
            out.push_str(&format!("project_id = \"{project_id}\"\n"));
        }
        if let Some(api) = &self.api {
            out.push_str(&format!("api = \"{api}\"\n"));
        }
        if !self.stack.is_empty() {
            out.push_str(&format!("stack = \"{}\"\n", self.stack.join(",")));
        }
        std::fs::write(Self::path(), out)?;
        Ok(())
    }
}

fn resolve_project(cli: &Cli) -> Result<String, i32> {
    if let Some(project) = &cli.project {
        return Ok(project.clone());
    }
    LocalConfig::load()
        .and_then(|c| c.project_id)
        .ok_or_else(|| {
            eprintln!("no project configured; pass --project or run `mend init --project-id`");
            EXIT_CONFIG
        })
}

/// Map an HTTP failure to the exit-code contract.
fn exit_for_status(status: reqwest::StatusCode) -> i32 {
    match status.as_u16() {
        401 | 403 => EXIT_AUTH,
        429 => EXIT_QUOTA,
        500..=599 => EXIT_REMOTE,
        _ => EXIT_GENERIC,
    }
}

async fn get_json(client: &reqwest::Client, url: &str) -> Result<serde_json::Value, i32> {
    let response = client.get(url).send().await.map_err(|e| {
        eprintln!("cannot reach daemon: {e}");
        EXIT_REMOTE
    })?;
    let status = response.status();
    if !status.is_success() {
        eprintln!("daemon returned {status}");
        return Err(exit_for_status(status));
    }
    response.json().await.map_err(|e| {
        eprintln!("unreadable response: {e}");
        EXIT_GENERIC
    })
}

async fn post_json(
    client: &reqwest::Client,
    url: &str,
    body: serde_json::Value,
) -> Result<serde_json::Value, i32> {
    let response = client.post(url).json(&body).send().await.map_err(|e| {
        eprintln!("cannot reach daemon: {e}");
        EXIT_REMOTE
    })?;
    let status = response.status();
    if !status.is_success() {
        eprintln!("daemon returned {status}");
        return Err(exit_for_status(status));
    }
    Ok(response.json().await.unwrap_or(serde_json::Value::Null))
}

fn render_issues(issues: &[serde_json::Value], format: Format) -> String {
    match format {
        Format::Json => serde_json::to_string_pretty(issues).unwrap_or_default(),
        Format::Csv => {
            let mut out = String::from("severity,kind,status,path,line,message\n");
            for issue in issues {
                out.push_str(&format!(
                    "{},{},{},{},{},{:?}\n",
                    issue["severity"].as_str().unwrap_or(""),
                    issue["kind"].as_str().unwrap_or(""),
                    issue["status"].as_str().unwrap_or(""),
                    issue["path"].as_str().unwrap_or(""),
                    issue["line"],
                    issue["message"].as_str().unwrap_or(""),
                ));
            }
            out
        }
        Format::Text => {
            let mut out = String::new();
            for issue in issues {
                out.push_str(&format!(
                    "[{:>8}] {}:{} {} ({})\n",
                    issue["severity"].as_str().unwrap_or(""),
                    issue["path"].as_str().unwrap_or(""),
                    issue["line"],
                    issue["message"].as_str().unwrap_or(""),
                    issue["status"].as_str().unwrap_or(""),
                ));
            }
            out
        }
    }
}

fn write_output(rendered: &str, output: Option<&PathBuf>) -> Result<(), i32> {
    match output {
        Some(path) => std::fs::write(path, rendered).map_err(|e| {
            eprintln!("cannot write {}: {e}", path.display());
            EXIT_GENERIC
        }),
        None => {
            print!("{rendered}");
            Ok(())
        }
    }
}

async fn run(cli: Cli) -> Result<(), i32> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .map_err(|_| EXIT_GENERIC)?;
    let api = cli.api.trim_end_matches('/').to_string();

    match &cli.command {
        Commands::Init { path, project_id } => {
            let stack = mend_core::profile_stack(path);
            let config = LocalConfig {
                project_id: project_id.clone(),
                api: Some(api.clone()),
                stack: stack.iter().map(|k| k.as_str().to_string()).collect(),
            };
            config.save().map_err(|e| {
                eprintln!("cannot write configuration: {e}");
                EXIT_CONFIG
            })?;
            println!("initialized; detected stack:");
            for kind in stack {
                println!("  - {kind}");
            }
            Ok(())
        }

        Commands::Crawl { auto_fix, budget } => {
            let project = resolve_project(&cli)?;
            let body = serde_json::json!({
                "project_id": project,
                "options": { "auto_fix": auto_fix, "budget": budget }
            });
            let json = post_json(&client, &format!("{api}/crawl"), body).await?;
            println!("crawl accepted: job {}", json["job_id"].as_str().unwrap_or("?"));
            Ok(())
        }

        Commands::Status { job_id } => {
            let json = get_json(&client, &format!("{api}/crawl/{job_id}")).await?;
            println!("status: {}", json["status"].as_str().unwrap_or("?"));
            if !json["stats"].is_null() {
                println!("stats: {}", json["stats"]);
            }
            Ok(())
        }

        Commands::Issues {
            severity,
            kind,
            status,
            format,
            output,
            limit,
        } => {
            let project = resolve_project(&cli)?;
            let mut url = format!("{api}/issues?project_id={project}&limit={limit}");
            if let Some(severity) = severity {
                url.push_str(&format!("&severity={severity}"));
            }
            if let Some(kind) = kind {
                url.push_str(&format!("&kind={kind}"));
            }
            if let Some(status) = status {
                url.push_str(&format!("&status={status}"));
            }
            let json = get_json(&client, &url).await?;
            let issues = json["issues"].as_array().cloned().unwrap_or_default();
            let rendered = render_issues(&issues, *format);
            write_output(&rendered, output.as_ref())
        }

        Commands::Stats { range } => {
            let project = resolve_project(&cli)?;
            let json = get_json(
                &client,
                &format!("{api}/analytics?project_id={project}&range={range}"),
            )
            .await?;
            let series = json["series"].as_array().cloned().unwrap_or_default();
            if series.is_empty() {
                println!("no health data in range {range}");
                return Ok(());
            }
            let scores: Vec<i64> = series.iter().filter_map(|h| h["score"].as_i64()).collect();
            let latest = scores.last().copied().unwrap_or(0);
            let min = scores.iter().min().copied().unwrap_or(0);
            let max = scores.iter().max().copied().unwrap_or(0);
            println!(
                "{} snapshots over {range}: latest {latest}, min {min}, max {max}",
                series.len()
            );
            Ok(())
        }

        Commands::Watch { path, auto_fix } => {
            let project = resolve_project(&cli)?;
            let (_watcher, mut rx) =
                mend_core::RepoWatcher::start(path, mend_core::watch::DEFAULT_DEBOUNCE).map_err(
                    |e| {
                        eprintln!("cannot watch {}: {e}", path.display());
                        EXIT_GENERIC
                    },
                )?;
            println!("watching {} (ctrl-c to stop)", path.display());

            while let Some(batch) = rx.recv().await {
                println!("{} file(s) changed; triggering crawl", batch.len());
                let body = serde_json::json!({
                    "project_id": project,
                    "options": { "auto_fix": auto_fix }
                });
                if let Err(code) = post_json(&client, &format!("{api}/crawl"), body).await {
                    return Err(code);
                }
            }
            Ok(())
        }

        Commands::Export { output, format } => {
            let project = resolve_project(&cli)?;
            let json = get_json(
                &client,
                &format!("{api}/issues?project_id={project}&limit=10000"),
            )
            .await?;
            let issues = json["issues"].as_array().cloned().unwrap_or_default();
            let rendered = render_issues(&issues, *format);
            write_output(&rendered, Some(output))?;
            println!("exported {} issue(s) to {}", issues.len(), output.display());
            Ok(())
        }

        Commands::Config => {
            match LocalConfig::load() {
                Some(config) => {
                    println!("project_id = {}", config.project_id.as_deref().unwrap_or("<unset>"));
                    println!("api        = {}", config.api.as_deref().unwrap_or(&api));
                }
                None => {
                    println!("no local configuration; run `mend init`");
                }
            }
            Ok(())
        }

        Commands::Clean => {
            match std::fs::remove_dir_all(".mend") {
                Ok(()) => println!("removed .mend"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    println!("nothing to clean");
                }
                Err(e) => {
                    eprintln!("cannot clean: {e}");
                    return Err(EXIT_GENERIC);
                }
            }
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let level = if cli.verbose { Level::DEBUG } else { Level::WARN };
    mend_core::init_tracing(cli.json, level);

    let code = match run(cli).await {
        Ok(()) => EXIT_OK,
        Err(code) => code,
    };
    std::process::exit(code);
}
