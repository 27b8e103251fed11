use clap::{Parser, Subcommand};
use rp_tables::cms::GhostClient;
use rp_tables::config::{AppConfig, Environment, Needs};
use rp_tables::job::{self, Job, Registry};
use rp_tables::output;
use rp_tables::publish::Publisher;
use rp_tables::render::{preview_page, render_table};
use rp_tables::source::MySqlSource;
use rp_tables::spec::TableSpec;
use rp_tables::store::{ArtifactStore, LocalStore, SpacesStore};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Shared flags for commands that publish.
#[derive(clap::Args, Clone)]
struct PublishArgs {
    /// Write artifacts under this directory instead of uploading to Spaces
    #[arg(long)]
    out_dir: Option<PathBuf>,

    /// Upload artifacts but do not patch Ghost documents
    #[arg(long)]
    no_patch: bool,
}

fn version_string() -> &'static str {
    let on_tag = env!("ON_RELEASE_TAG");
    if on_tag == "true" {
        env!("CARGO_PKG_VERSION")
    } else {
        let hash = env!("GIT_HASH");
        if hash.is_empty() {
            "dev@unknown"
        } else {
            Box::leak(format!("dev@{hash}").into_boxed_str())
        }
    }
}

#[derive(Parser)]
#[command(name = "rp-tables")]
#[command(about = "Publish database-backed comparison tables")]
#[command(long_about = "\
Publish database-backed comparison tables

Each job queries MySQL, builds a table, renders it to an HTML fragment,
uploads the fragment and a JSON envelope to DigitalOcean Spaces, and can
replace the previously published table inside a Ghost page or post.

Jobs directory:

  jobs/
  ├── defaults.toml              # Merged under every job (optional)
  ├── transfer_partners.toml     # One job per file, [table] or [[tables]]
  └── pages/
      └── card_matrix.toml       # Subdirectories are searched too

Environment:
  HEADER_AUTHOR, HEADER_DISCLOSURE, HEADER_LICENSE_URL
  DB_HOST, DB_PORT, DB_USER, DB_PASSWORD, DB_NAME, DB_CA_CERT
  SPACES_{REGION,KEY,SECRET,BUCKET}_{PUBLIC,PRIVATE}
  GHOST_ADMIN_API_URL, GHOST_ADMIN_API_KEY, GHOST_ADMIN_API_VERSION
  RUST_LOG (default: info)

Run 'rp-tables gen-config' to print a documented job file.")]
#[command(version = version_string())]
struct Cli {
    /// Jobs directory
    #[arg(long, default_value = "jobs", global = true)]
    jobs_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Publish the named jobs
    Run {
        /// Job names
        #[arg(required = true)]
        jobs: Vec<String>,
        #[command(flatten)]
        publish: PublishArgs,
    },
    /// Publish every job with include_in_all = true, one after another
    RunAll(PublishArgs),
    /// List jobs with their tables and targets
    List,
    /// Load and validate every job file without connecting to anything
    Check,
    /// Render a table spec JSON file to HTML on stdout
    Render {
        /// TableSpec JSON, or a published envelope's contents
        file: PathBuf,
        /// Wrap the fragment in a standalone HTML page
        #[arg(long)]
        page: bool,
    },
    /// Print a stock job file with all options documented
    GenConfig,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let cli = Cli::parse();
    let registry = Registry::default();

    match cli.command {
        Command::Run { jobs, publish } => {
            let loaded = job::load_jobs(&cli.jobs_dir, &registry)?;
            let selected = job::select(&loaded, &jobs)?;
            run_jobs(&selected, &publish).await?;
        }
        Command::RunAll(publish) => {
            let loaded = job::load_jobs(&cli.jobs_dir, &registry)?;
            let selected: Vec<&Job> = loaded.iter().filter(|j| j.include_in_all).collect();
            run_jobs(&selected, &publish).await?;
        }
        Command::List => {
            let loaded = job::load_jobs(&cli.jobs_dir, &registry)?;
            output::print_job_list(&loaded);
        }
        Command::Check => {
            println!("==> Checking {}", cli.jobs_dir.display());
            let loaded = job::load_jobs(&cli.jobs_dir, &registry)?;
            output::print_job_list(&loaded);
            println!("==> {} jobs are valid", loaded.len());
        }
        Command::Render { file, page } => {
            let json = std::fs::read_to_string(&file)?;
            let spec = TableSpec::from_json_str(&json)?;
            let fragment = render_table(&spec)?;
            if page {
                let title = if spec.id.is_empty() { "Table preview" } else { spec.id.as_str() };
                println!("{}", preview_page(title, &fragment).into_string());
            } else {
                println!("{}", fragment.into_string());
            }
        }
        Command::GenConfig => {
            print!("{}", job::stock_job_toml());
        }
    }

    Ok(())
}

/// Assemble collaborators from the environment and publish `jobs` in order.
async fn run_jobs(jobs: &[&Job], args: &PublishArgs) -> Result<(), Box<dyn std::error::Error>> {
    let needs = Needs {
        storage: args.out_dir.is_none(),
        ghost: !args.no_patch && jobs.iter().any(|j| j.patch.is_some()),
    };
    let config = AppConfig::load(&Environment::process(), needs)?;

    let source = MySqlSource::new(&config.database);
    let store: Box<dyn ArtifactStore> = match &args.out_dir {
        Some(dir) => Box::new(LocalStore::new(dir)),
        None => Box::new(SpacesStore::new(&config.storage.unwrap_or_default())),
    };
    let ghost = config.ghost.as_ref().map(GhostClient::new).transpose()?;

    let mut publisher =
        Publisher::new(&source, store.as_ref(), config.header).skip_patch(args.no_patch);
    if let Some(ghost) = &ghost {
        publisher = publisher.with_documents(ghost);
    }

    let outcomes = publisher.run_all(jobs).await;
    output::print_outcomes(&outcomes);

    let failed = outcomes.iter().filter(|o| o.is_err()).count();
    if failed > 0 {
        return Err(format!("{failed} of {} jobs failed", outcomes.len()).into());
    }
    Ok(())
}

/// Log to stderr so `render` output on stdout stays clean.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
