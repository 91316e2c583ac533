use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;

use slidewright::banner::{BannerInfo, print_banner, print_run_summary};
use slidewright::config::Settings;
use slidewright::consts::{DEFAULT_BIND, DEFAULT_LANGUAGE, DEFAULT_PORT, DEFAULT_REPORTS_DIR, default_db_path};
use slidewright::credentials::CredentialStore;
use slidewright::engine::{Engine, PptEngine};
use slidewright::events::{Event, EventBus};
use slidewright::project::Project;
use slidewright::provider::{ProviderConfig, ProviderKind, Usage, build_provider};
use slidewright::repository::{ProjectRepository, SqliteRepository};
use slidewright::research::{ReportGenerator, ResearchReport};
use slidewright::schema::PptGenerationRequest;
use slidewright::server::{self, AppState};

#[derive(Parser)]
#[command(name = "slidewright", version, about = "Topics in, slide decks out.")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// SQLite database for projects, boards, settings and keys
    #[arg(short, long, env = "SLIDEWRIGHT_DB", global = true)]
    db: Option<String>,

    /// AI provider (overrides the stored setting)
    #[arg(short, long, value_enum, env = "SLIDEWRIGHT_PROVIDER", global = true)]
    provider: Option<ProviderKind>,

    /// Model name (provider-specific)
    #[arg(long, env = "SLIDEWRIGHT_MODEL", global = true)]
    model: Option<String>,

    /// Base URL for OpenAI-compatible endpoints
    #[arg(long, env = "SLIDEWRIGHT_BASE_URL", global = true)]
    base_url: Option<String>,

    /// Directory for saved research reports
    #[arg(long, env = "SLIDEWRIGHT_REPORTS_DIR", global = true)]
    reports_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server
    Serve {
        #[arg(long, default_value = DEFAULT_BIND)]
        bind: String,
        #[arg(long, default_value_t = DEFAULT_PORT)]
        port: u16,
    },
    /// Generate a deck for a topic and write it as HTML
    Generate {
        topic: String,
        #[arg(short, long, default_value = "general")]
        scenario: String,
        #[arg(short, long)]
        requirements: Option<String>,
        /// Content language, e.g. zh or en
        #[arg(short, long)]
        language: Option<String>,
        #[arg(long)]
        audience: Option<String>,
        /// Output file (defaults to <project id>.html)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Manage saved research reports
    Reports {
        #[command(subcommand)]
        action: ReportsAction,
    },
    /// Read or change stored settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Store an API key for a provider
    SetKey {
        #[arg(value_enum)]
        provider: ProviderKind,
        key: String,
    },
}

#[derive(Subcommand)]
enum ReportsAction {
    /// List saved reports, newest first
    List,
    /// Delete a saved report by file name
    Delete { filename: String },
    /// Render a research report JSON file to Markdown and save it
    Render {
        input: PathBuf,
        /// File name inside the reports directory
        #[arg(long)]
        filename: Option<String>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Get { key: String },
    Set { key: String, value: String },
    Unset { key: String },
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let db = resolve_db(cli.db.clone())?;
    let settings = Settings::open(&db)?;

    match &cli.command {
        Command::Config { action } => return handle_config(&settings, action),
        Command::SetKey { provider, key } => {
            let credentials = CredentialStore::open(&db)?;
            credentials.set(provider.as_str(), key)?;
            println!("✓ Stored API key for {}.", provider.as_str());
            return Ok(());
        }
        _ => {}
    }

    let reports_dir = settings
        .resolve(
            cli.reports_dir.as_ref().map(|p| p.display().to_string()),
            "reports_dir",
        )?
        .unwrap_or_else(|| DEFAULT_REPORTS_DIR.to_string());
    let reports = Arc::new(ReportGenerator::new(reports_dir));

    if let Command::Reports { action } = &cli.command {
        return handle_reports(&reports, action);
    }

    let kind = match cli.provider {
        Some(kind) => kind,
        None => match settings.get("provider")? {
            Some(stored) => ProviderKind::parse(&stored)?,
            None => ProviderKind::Anthropic,
        },
    };
    let provider_config = ProviderConfig {
        kind,
        model: settings.resolve(cli.model.clone(), "model")?,
        base_url: settings.resolve(cli.base_url.clone(), "base_url")?,
    };

    let credentials = Arc::new(CredentialStore::open(&db)?);
    let auth_status = credentials.status(kind.as_str(), kind.env_var())?;
    let provider = build_provider(&provider_config, credentials);

    let repo = Arc::new(SqliteRepository::open(&db)?);
    let events = Arc::new(EventBus::default());
    let engine = Arc::new(PptEngine::new(
        provider.clone(),
        repo.clone(),
        repo.clone(),
        events.clone(),
    )?);

    match cli.command {
        Command::Serve { bind, port } => {
            let address = format!("{bind}:{port}");
            print_banner(&BannerInfo {
                provider: provider.name(),
                model: provider.model(),
                auth_status,
                database: &db,
                reports_dir: reports.reports_dir(),
                address: Some(&address),
            });
            let state = AppState {
                projects: repo.clone(),
                boards: repo,
                engine,
                reports,
            };
            server::run(&bind, port, state).await
        }
        Command::Generate {
            topic,
            scenario,
            requirements,
            language,
            audience,
            out,
        } => {
            print_banner(&BannerInfo {
                provider: provider.name(),
                model: provider.model(),
                auth_status,
                database: &db,
                reports_dir: reports.reports_dir(),
                address: None,
            });

            let mut request = PptGenerationRequest::new(scenario, topic);
            request.requirements = requirements;
            request.target_audience = audience;
            request.language = match language {
                Some(language) => language,
                None => settings
                    .get("language")?
                    .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
            };
            let project = Project::from_request(&request);
            repo.put(&project).await?;

            let printer = tokio::spawn(print_progress(
                events.subscribe(),
                project.project_id.clone(),
            ));
            let result = engine.generate(&project.project_id).await;
            printer.abort();
            let project = result?;

            let html = project
                .slides_html()
                .context("generation finished without slides")?;
            let out = out.unwrap_or_else(|| PathBuf::from(format!("{}.html", project.project_id)));
            std::fs::write(&out, html)
                .with_context(|| format!("failed to write {}", out.display()))?;

            let usage: Usage = project
                .metadata("last_usage")
                .and_then(|v| serde_json::from_value(v.clone()).ok())
                .unwrap_or_default();
            print_run_summary(usage, project.slides_data().map_or(0, <[_]>::len));
            println!("=> {}", out.display());
            Ok(())
        }
        Command::Reports { .. } | Command::Config { .. } | Command::SetKey { .. } => Ok(()),
    }
}

/// `--db` wins; otherwise `~/.slidewright/slidewright.db`, created on demand.
fn resolve_db(cli_db: Option<String>) -> Result<String> {
    if let Some(db) = cli_db {
        return Ok(db);
    }
    let path = default_db_path()?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    Ok(path.display().to_string())
}

fn handle_config(settings: &Settings, action: &ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Get { key } => match settings.get(key)? {
            Some(value) => println!("{value}"),
            None => bail!("{key} is not set"),
        },
        ConfigAction::Set { key, value } => {
            if key == "provider" {
                ProviderKind::parse(value)?;
            }
            settings.set(key, value)?;
            println!("✓ {key} = {value}");
        }
        ConfigAction::Unset { key } => {
            settings.remove(key)?;
            println!("✓ {key} unset");
        }
        ConfigAction::List => {
            for (key, value) in settings.list()? {
                println!("{key} = {value}");
            }
        }
    }
    Ok(())
}

fn handle_reports(reports: &ReportGenerator, action: &ReportsAction) -> Result<()> {
    match action {
        ReportsAction::List => {
            let saved = reports.list_saved();
            if saved.is_empty() {
                println!("no reports in {}", reports.reports_dir().display());
            }
            for report in saved {
                println!(
                    "{}  {:>8} bytes  {}",
                    report.modified.format("%Y-%m-%d %H:%M"),
                    report.size,
                    report.filename
                );
            }
        }
        ReportsAction::Delete { filename } => {
            if !reports.delete(filename) {
                bail!("no report named {filename}");
            }
            println!("✓ deleted {filename}");
        }
        ReportsAction::Render { input, filename } => {
            let report = read_report(input)?;
            let path = reports.save(&report, filename.as_deref())?;
            println!("=> {}", path.display());
        }
    }
    Ok(())
}

fn read_report(path: &Path) -> Result<ResearchReport> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&json).with_context(|| format!("{} is not a research report", path.display()))
}

/// Print stage progress for one project until the task is aborted.
async fn print_progress(mut rx: broadcast::Receiver<Event>, project_id: String) {
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        };
        if event.project_id() != project_id {
            continue;
        }
        match event {
            Event::StageAdvanced { stage_id, board } => {
                if let Some(stage) = board.stage(&stage_id) {
                    println!(
                        "  [{:>3.0}%] {} {} ({:.0}%)",
                        board.overall_progress() * 100.0,
                        stage.name(),
                        stage.status(),
                        stage.progress() * 100.0
                    );
                }
            }
            Event::StageFailed {
                stage_id, reason, ..
            } => eprintln!("  ✗ {stage_id}: {reason}"),
            Event::BoardCreated { .. } | Event::ProjectStatusChanged { .. } => {}
        }
    }
}
