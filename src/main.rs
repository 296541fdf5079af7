use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use dotenvy::dotenv;

use research_fields_bot::config::{OracleSettings, PathSettings, ScholarSettings};
use research_fields_bot::{logging, run_job, InputSource, Job, ProcessingMode, Services};

#[derive(Parser)]
#[command(
    name = "research-fields",
    version,
    about = "Classify an author or a laboratory spreadsheet into OECD research fields"
)]
struct Cli {
    /// Semantic Scholar author ID.
    #[arg(long, conflicts_with = "document", required_unless_present = "document")]
    author_id: Option<u64>,
    /// Laboratory spreadsheet (.xlsx, .xls, .ods, .csv).
    #[arg(long)]
    document: Option<PathBuf>,
    #[arg(long, value_enum, default_value = "taxonomy")]
    mode: ProcessingMode,
    /// Prefix for author artifacts.
    #[arg(long, default_value_t = 0)]
    user_id: i64,
    #[arg(long, env = "TAXONOMY_PATH")]
    taxonomy: Option<PathBuf>,
    #[arg(long, env = "FILES_DIR")]
    files_dir: Option<PathBuf>,
    #[arg(long, env = "PROMPTS_PATH")]
    prompts: Option<PathBuf>,
    #[arg(long, env = "OPENAI_MODEL")]
    openai_model: Option<String>,
}

fn main() -> Result<()> {
    dotenv().ok();
    logging::init();
    let cli = Cli::parse();

    let mut paths = PathSettings::from_env();
    if let Some(taxonomy) = cli.taxonomy {
        paths.taxonomy_path = taxonomy;
    }
    if let Some(files_dir) = cli.files_dir {
        paths.files_dir = files_dir;
    }
    if cli.prompts.is_some() {
        paths.prompts_path = cli.prompts;
    }
    let mut oracle = OracleSettings::from_env()?;
    if let Some(model) = cli.openai_model {
        oracle.model = model;
    }
    let scholar = ScholarSettings::from_env();

    let source = match (cli.author_id, cli.document) {
        (Some(author_id), None) => InputSource::Identifier(author_id),
        (None, Some(document)) => {
            if !document.is_file() {
                bail!("document not found: {}", document.display());
            }
            InputSource::Document(document)
        }
        _ => bail!("pass exactly one of --author-id or --document"),
    };

    let services =
        Services::from_settings(&paths, &oracle, &scholar).context("initialize services")?;
    let job = Job {
        user_id: cli.user_id,
        source,
        mode: cli.mode,
    };
    let path = run_job(&services, &job).context("run job")?;
    println!("{}", path.display());
    Ok(())
}
