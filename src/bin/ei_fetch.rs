use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use ecoinvent_fetch::client::{ClientConfig, EcoinventClient};
use ecoinvent_fetch::domain::{ProcessFileType, ReleaseType};
use ecoinvent_fetch::error::EcoError;
use ecoinvent_fetch::output::{CacheListing, ClearResult, FileListing, JsonOutput};
use ecoinvent_fetch::process::{ProcessClient, ProcessSelector};
use ecoinvent_fetch::release::ReleaseOptions;
use ecoinvent_fetch::settings::{SettingKey, Settings, SettingsLoader};
use ecoinvent_fetch::store::CachedStorage;

#[derive(Parser)]
#[command(name = "ei-fetch")]
#[command(about = "Download and cache ecoinvent releases, extras, reports and datasets")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    username: Option<String>,

    #[arg(long, global = true)]
    password: Option<String>,

    /// Cache directory; defaults to the platform data directory.
    #[arg(long, global = true)]
    output_path: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "List available release versions")]
    Versions,
    #[command(about = "List system models of a version")]
    SystemModels {
        version: String,
        /// Print full display names instead of abbreviations.
        #[arg(long)]
        full_names: bool,
    },
    #[command(about = "Download (or reuse) a release archive")]
    Release(ReleaseArgs),
    #[command(about = "List extra files of a version")]
    Extras { version: String },
    #[command(about = "Download (or reuse) an extra file")]
    Extra {
        version: String,
        filename: String,
        #[command(flatten)]
        cache: CacheFlags,
    },
    #[command(about = "List reports")]
    Reports,
    #[command(about = "Download (or reuse) a report")]
    Report {
        filename: String,
        #[command(flatten)]
        cache: CacheFlags,
    },
    #[command(about = "Locate the LCIA implementation spreadsheet of a version")]
    LciaExcel { version: String },
    #[command(about = "Inspect or clear the local cache")]
    Cache(CacheArgs),
    #[command(about = "Query a single dataset")]
    Process(ProcessArgs),
    #[command(about = "Store a setting as a secret file")]
    SetSecret { key: String, value: String },
}

#[derive(Args)]
struct ReleaseArgs {
    version: String,
    system_model: String,

    #[arg(long = "type", value_enum, default_value_t = ReleaseType::Ecospold)]
    release_type: ReleaseType,

    #[command(flatten)]
    cache: CacheFlags,

    #[arg(long)]
    no_fix_version: bool,
}

#[derive(Args, Clone, Copy)]
struct CacheFlags {
    #[arg(long)]
    no_extract: bool,

    #[arg(long)]
    force: bool,
}

impl CacheFlags {
    fn options(self) -> ReleaseOptions {
        ReleaseOptions {
            extract: !self.no_extract,
            force_redownload: self.force,
            ..ReleaseOptions::default()
        }
    }
}

#[derive(Args)]
struct CacheArgs {
    #[command(subcommand)]
    command: CacheCommand,
}

#[derive(Subcommand)]
enum CacheCommand {
    #[command(about = "List catalogue entries")]
    List,
    #[command(about = "Delete every cached file")]
    Clear,
}

#[derive(Args)]
struct ProcessArgs {
    version: String,
    system_model: String,
    dataset_id: String,

    #[arg(long, conflicts_with = "file")]
    documentation: bool,

    #[arg(long, value_enum, requires = "dir")]
    file: Option<ProcessFileType>,

    #[arg(long)]
    dir: Option<PathBuf>,
}

#[derive(Serialize)]
struct PathResult {
    path: PathBuf,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<EcoError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &EcoError) -> u8 {
    match error {
        EcoError::NotFound(_)
        | EcoError::CacheConsistency { .. }
        | EcoError::MissingSetting(..)
        | EcoError::InvalidSelection(_) => 2,
        EcoError::Http(_) | EcoError::HttpStatus { .. } | EcoError::LicenseDenied(_) => 3,
        EcoError::Authentication { .. } => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let loader = SettingsLoader::new();
    let settings = loader.resolve(Settings {
        username: cli.username,
        password: cli.password,
        output_path: cli.output_path,
    });

    match cli.command {
        Commands::Cache(args) => run_cache(args.command, &settings),
        Commands::SetSecret { key, value } => {
            let key = SettingKey::parse(&key)?;
            let path = loader.write_secret(key, &value)?;
            JsonOutput::print_json(&PathResult { path }).into_diagnostic()
        }
        command => {
            let client = EcoinventClient::new(&settings, ClientConfig::default())?;
            run_remote(command, client)
        }
    }
}

fn run_cache(command: CacheCommand, settings: &Settings) -> miette::Result<()> {
    let storage = CachedStorage::from_output_path(settings.output_path.as_deref())?;
    match command {
        CacheCommand::List => JsonOutput::print_cache(&CacheListing {
            root: storage.root().to_string(),
            entries: storage.catalogue().entries()?,
        })
        .into_diagnostic(),
        CacheCommand::Clear => {
            let removed = storage.catalogue().len()?;
            storage.clear()?;
            JsonOutput::print_clear(&ClearResult {
                root: storage.root().to_string(),
                removed,
            })
            .into_diagnostic()
        }
    }
}

fn run_remote(command: Commands, mut client: EcoinventClient) -> miette::Result<()> {
    match command {
        Commands::Versions => JsonOutput::print_json(&client.list_versions()?).into_diagnostic(),
        Commands::SystemModels {
            version,
            full_names,
        } => JsonOutput::print_json(&client.list_system_models(&version, !full_names)?)
            .into_diagnostic(),
        Commands::Release(args) => {
            let options = ReleaseOptions {
                fix_version: !args.no_fix_version,
                ..args.cache.options()
            };
            let result = client.get_release(
                &args.version,
                &args.system_model,
                args.release_type,
                options,
            )?;
            JsonOutput::print_json(&result).into_diagnostic()
        }
        Commands::Extras { version } => {
            let index = client.list_extra_files(&version)?;
            JsonOutput::print_files(&FileListing::new(Some(&version), &index)).into_diagnostic()
        }
        Commands::Extra {
            version,
            filename,
            cache,
        } => {
            let outcome = client.get_extra(&version, &filename, cache.options())?;
            JsonOutput::print_json(&outcome).into_diagnostic()
        }
        Commands::Reports => {
            let index = client.list_report_files()?;
            JsonOutput::print_files(&FileListing::new(None, &index)).into_diagnostic()
        }
        Commands::Report { filename, cache } => {
            let outcome = client.get_report(&filename, cache.options())?;
            JsonOutput::print_json(&outcome).into_diagnostic()
        }
        Commands::LciaExcel { version } => {
            let path = client.excel_lcia_file_for_version(&version)?;
            JsonOutput::print_json(&PathResult { path }).into_diagnostic()
        }
        Commands::Process(args) => run_process(args, client),
        Commands::Cache(_) | Commands::SetSecret { .. } => {
            Err(miette::Report::msg("command doesn't use the remote API"))
        }
    }
}

fn run_process(args: ProcessArgs, client: EcoinventClient) -> miette::Result<()> {
    let mut process = ProcessClient::new(client);
    process.set_release(&args.version, &args.system_model)?;
    process.select_process(ProcessSelector::DatasetId(args.dataset_id))?;

    if let Some(file_type) = args.file {
        let dir = args
            .dir
            .ok_or_else(|| miette::Report::msg("--file requires --dir"))?;
        std::fs::create_dir_all(&dir).into_diagnostic()?;
        let path = process.get_file(file_type, &dir)?;
        return JsonOutput::print_json(&PathResult { path }).into_diagnostic();
    }

    let value = if args.documentation {
        process.documentation()?
    } else {
        process.basic_info()?
    };
    JsonOutput::print_json(&value).into_diagnostic()
}
