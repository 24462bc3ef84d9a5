use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use rapport::catalog::{fetch_catalog, load_catalog};
use rapport::data::{load_default_data, sample_data};
use rapport::inspect::{missing_data_paths, template_commands};
use rapport::{Action, AppState, CatalogMode, ReportGenerator, Session, Settings};
use rapport_template::Delimiters;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "rapport", version, about = "Génère des rapports DOCX à partir de données JSON")]
struct Cli {
    /// Configuration file, `./rapport.toml` when present otherwise
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the catalog templates
    Catalog,
    /// Generate rapport.docx
    Generate(GenerateArgs),
    /// List the commands of a template
    Inspect {
        template: PathBuf,
        /// Report the data paths this JSON file lacks
        #[arg(long)]
        data: Option<PathBuf>,
    },
    /// Print the embedded sample data
    SampleData,
}

#[derive(Debug, Args)]
struct GenerateArgs {
    /// Local .docx template
    #[arg(long, conflicts_with = "remote")]
    template: Option<PathBuf>,
    /// Index of a catalog template, as listed by `rapport catalog`
    #[arg(long)]
    remote: Option<usize>,
    /// JSON data file, the configured `data_path` otherwise
    #[arg(long)]
    data: Option<PathBuf>,
    /// Output directory
    #[arg(long)]
    out: Option<PathBuf>,
}

fn init_tracing(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;
    init_tracing(&settings.log_level);

    let client = reqwest::Client::new();
    match cli.command {
        Command::Catalog => {
            match load_catalog(&client, settings.catalog_url.as_deref()).await {
                CatalogMode::Remote(entries) => {
                    for (index, entry) in entries.iter().enumerate() {
                        println!("[{index}] {}\t{}", entry.description, entry.url);
                    }
                }
                CatalogMode::UploadOnly => println!("Aucun catalogue disponible, utilisez un template local."),
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Generate(args) => generate(&client, &settings, args).await,
        Command::Inspect { template, data } => inspect(&template, data.as_deref()),
        Command::SampleData => {
            println!("{}", serde_json::to_string_pretty(&sample_data())?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn generate(client: &reqwest::Client, settings: &Settings, args: GenerateArgs) -> anyhow::Result<ExitCode> {
    let output_dir = args.out.unwrap_or_else(|| settings.output_dir.clone());
    let mut session = Session::new(
        AppState::new(settings.confirmation()),
        client.clone(),
        ReportGenerator::default(),
        output_dir,
    );

    if let Some(url) = settings.catalog_url.as_deref() {
        session.dispatch(Action::CatalogLoaded(fetch_catalog(client, url).await)).await;
    }

    match args.data {
        Some(path) => {
            let text = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("unable to read {}", path.display()))?;
            session.dispatch(Action::DataEdited(text)).await;
        }
        None => {
            let value = load_default_data(client, &settings.data_path).await;
            session.dispatch(Action::DefaultDataLoaded(value)).await;
        }
    }

    if let Some(path) = args.template {
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("unable to read {}", path.display()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        session.dispatch(Action::LocalFileChosen { name, bytes: bytes.into() }).await;
    } else if let Some(index) = args.remote {
        session.dispatch(Action::RemoteSelected(index)).await;
    }
    info!(status = %session.state().resolver.status_text(), "template");

    session.dispatch(Action::GenerateRequested).await;

    let alerts = session.take_alerts();
    if !alerts.is_empty() {
        for alert in alerts {
            eprintln!("{alert}");
        }
        return Ok(ExitCode::FAILURE);
    }
    for path in session.downloads() {
        println!("{}", path.display());
    }
    Ok(ExitCode::SUCCESS)
}

fn inspect(template: &Path, data: Option<&Path>) -> anyhow::Result<ExitCode> {
    let bytes = std::fs::read(template).with_context(|| format!("unable to read {}", template.display()))?;
    let commands = template_commands(&bytes, &Delimiters::default())?;
    for command in &commands {
        println!("{command}");
    }

    if let Some(path) = data {
        let raw = std::fs::read(path).with_context(|| format!("unable to read {}", path.display()))?;
        let value: serde_json::Value =
            serde_json::from_slice(&raw).with_context(|| format!("{} is not valid JSON", path.display()))?;
        let missing = missing_data_paths(&commands, &value)?;
        if missing.is_empty() {
            println!("\nToutes les données utilisées par le template sont présentes.");
        } else {
            println!("\nDonnées manquantes :");
            for path in missing {
                println!("  {path}");
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}
