//! boinc2docker CLI
//!
//! Entry point for `boinc2docker-create-work`. Prints only the job id on
//! stdout; everything else goes to stderr.

use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use boinc2docker::config::{ConfigError, Settings, StoreTarget};
use boinc2docker::{
    CacheStore, CliRuntime, Command, ExitCode, FlatStore, ImageReference, InputFile, JobRequest,
    Outcome, PackageError, Packager, PackagerConfig,
};
use boinc_project::{CreateWork, DirHier, JobOptions, SubmitError, Submitter};
use clap::Parser;
use serde_json::{json, Map, Value};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "boinc2docker-create-work")]
#[command(about = "Package a local container image as a BOINC job and submit it", version)]
struct Cli {
    /// Container image to run (tag defaults to "latest")
    image: String,

    /// Command to run in the container
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,

    /// Overwrite the default ENTRYPOINT of the image
    #[arg(long)]
    entrypoint: Option<String>,

    /// Application to submit under (default: boinc2docker)
    #[arg(long)]
    appname: Option<String>,

    /// Shell line to run before the container (repeatable)
    #[arg(long, value_name = "CMD")]
    prerun: Vec<String>,

    /// Shell line to run after the container (repeatable)
    #[arg(long, value_name = "CMD")]
    postrun: Vec<String>,

    /// Extra input file, OPEN_NAME=PATH[:flag,flag] (repeatable)
    #[arg(long = "input-file", value_name = "SPEC")]
    input_files: Vec<InputFile>,

    /// BOINC project directory
    #[arg(long, conflicts_with = "download_dir")]
    project_dir: Option<PathBuf>,

    /// Flat download directory; packages without submitting to a project
    #[arg(long)]
    download_dir: Option<PathBuf>,

    /// Host config file (default: ~/.config/boinc2docker/config.toml)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Leave diagnostics out of the startup script
    #[arg(long)]
    no_diagnostics: bool,

    /// Archive layers concurrently
    #[arg(long)]
    parallel_layers: bool,

    /// More logging
    #[arg(long, short = 'v', conflicts_with = "quiet")]
    verbose: bool,

    /// Warnings and errors only
    #[arg(long, short = 'q')]
    quiet: bool,

    #[command(flatten)]
    create_work: CreateWorkArgs,
}

/// Options passed through to create_work
#[derive(clap::Args, Debug, Default)]
struct CreateWorkArgs {
    #[arg(long)]
    wu_name: Option<String>,
    #[arg(long)]
    result_template: Option<String>,
    #[arg(long)]
    batch: Option<u64>,
    #[arg(long)]
    priority: Option<i64>,
    #[arg(long)]
    target_nresults: Option<u32>,
    #[arg(long)]
    min_quorum: Option<u32>,
    #[arg(long)]
    max_error_results: Option<u32>,
    #[arg(long)]
    max_total_results: Option<u32>,
    #[arg(long)]
    max_success_results: Option<u32>,
    #[arg(long)]
    delay_bound: Option<f64>,
    #[arg(long)]
    rsc_fpops_est: Option<f64>,
    #[arg(long)]
    rsc_fpops_bound: Option<f64>,
    #[arg(long)]
    rsc_memory_bound: Option<f64>,
    #[arg(long)]
    rsc_disk_bound: Option<f64>,
    /// Any other create_work option, KEY=VALUE (repeatable)
    #[arg(long = "create-work-arg", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    extra: Vec<(String, String)>,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.trim_start_matches("--").replace('-', "_"), v.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))
}

impl CreateWorkArgs {
    /// Apply the flags that were given on top of configured defaults.
    fn apply(self, mut options: JobOptions) -> JobOptions {
        macro_rules! set {
            ($($field:ident),*) => {
                $(if self.$field.is_some() { options.$field = self.$field; })*
            };
        }
        set!(
            wu_name,
            result_template,
            batch,
            priority,
            target_nresults,
            min_quorum,
            max_error_results,
            max_total_results,
            max_success_results,
            delay_bound,
            rsc_fpops_est,
            rsc_fpops_bound,
            rsc_memory_bound,
            rsc_disk_bound
        );
        options.extra.extend(self.extra);
        options
    }
}

impl Cli {
    /// CLI layer of the config merge.
    fn overrides(&self) -> Value {
        let mut map = Map::new();
        if let Some(dir) = &self.project_dir {
            map.insert("project_dir".into(), json!(dir));
            map.insert("download_dir".into(), Value::Null);
        }
        if let Some(dir) = &self.download_dir {
            map.insert("download_dir".into(), json!(dir));
            map.insert("project_dir".into(), Value::Null);
        }
        if let Some(appname) = &self.appname {
            map.insert("appname".into(), json!(appname));
        }
        if self.no_diagnostics {
            map.insert("diagnostics".into(), json!(false));
        }
        if self.parallel_layers {
            map.insert("parallel_layers".into(), json!(true));
        }
        Value::Object(map)
    }
}

fn init_tracing(cli: &Cli) {
    let default = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(&cli);

    let code = match run(cli) {
        Ok(Outcome::Submitted { job_id, .. }) => {
            println!("{}", job_id);
            ExitCode::Success
        }
        Ok(Outcome::Interrupted { at }) => {
            tracing::warn!(state = ?at, "Run interrupted; temporary files cleaned up");
            ExitCode::Interrupted
        }
        Err(e) => {
            tracing::error!("{}", e);
            e.exit_code()
        }
    };
    process::exit(code.as_i32());
}

fn run(cli: Cli) -> Result<Outcome, PackageError> {
    let host_config = cli.config.clone().or_else(Settings::host_config_path);
    if let Some(path) = cli.config.as_ref().filter(|p| !p.exists()) {
        return Err(ConfigError::ValidationError(format!("config file not found: {}", path.display())).into());
    }
    let settings = Settings::load(host_config.as_deref(), Some(cli.overrides()))?;

    let image = ImageReference::parse(&cli.image)
        .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

    let store: Arc<dyn CacheStore>;
    let submitter: Arc<dyn Submitter>;
    match settings.store_target()? {
        StoreTarget::Project(dir) => {
            let hier = DirHier::new(&dir).map_err(|e| ConfigError::ValidationError(e.to_string()))?;
            store = Arc::new(hier);
            submitter = Arc::new(CreateWork::new(dir));
        }
        StoreTarget::Download(dir) => {
            store = Arc::new(FlatStore::new(&dir).map_err(|source| ConfigError::IoError {
                path: dir.clone(),
                source,
            })?);
            submitter = Arc::new(TemplateKeeper { dir });
        }
    }

    let signals = boinc2docker::signal::SignalHandler::new();
    if let Err(e) = signals.install() {
        tracing::warn!(error = %e, "Could not install signal handler");
    }

    let command = if cli.command.is_empty() {
        Command::default()
    } else {
        Command::Args(cli.command)
    };
    let request = JobRequest {
        image,
        command,
        entrypoint: cli.entrypoint,
        prerun: cli.prerun,
        postrun: cli.postrun,
        input_files: cli.input_files,
        appname: settings.appname.clone(),
        options: cli.create_work.apply(settings.create_work.clone()),
    };

    let packager = Packager::new(
        Arc::new(CliRuntime::new(settings.runtime.clone())),
        store,
        submitter,
        signals.state(),
        PackagerConfig::from(&settings),
    );
    packager.run(&request)
}

/// Submitter for `--download-dir`: there is no project to submit to, so the
/// input template is kept next to the staged files and its name is the job id.
struct TemplateKeeper {
    dir: PathBuf,
}

impl Submitter for TemplateKeeper {
    fn submit(
        &self,
        _appname: &str,
        options: &JobOptions,
        template: &Path,
        files: &[String],
    ) -> Result<String, SubmitError> {
        options.validate()?;
        let name = template
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or(SubmitError::NoJobId)?;
        let dest = self.dir.join(&name);
        fs::copy(template, &dest).map_err(SubmitError::Template)?;
        tracing::info!(template = %dest.display(), files = files.len(), "Packaged without a project");
        Ok(name)
    }
}
