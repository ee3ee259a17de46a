mod batch;
mod config;
mod consts;
mod environment;
mod error;
mod events;
mod gateway;
mod job;
mod lifecycle;
mod tools;
mod writer;

use crate::batch::{BatchSettings, expand_requests, run_batch, split_fasta, summarise};
use crate::config::{Config, get_config_path};
use crate::consts::cli::{EVENT_QUEUE_SIZE, EXIT_USAGE};
use crate::environment::{Environment, EnvironmentType};
use crate::error::ClientError;
use crate::events::{EventSink, spawn_progress_printer};
use crate::gateway::RestGateway;
use crate::job::{JobHandle, JobRequest};
use crate::lifecycle::{FetchPolicy, JobLifecycleController, OutputTarget, PollConfig};
use crate::tools::{ArgumentBinder, ToolCatalogue, ToolSchema};
use crate::writer::ResultWriter;
use clap::{ArgAction, Parser, Subcommand};
use log::{LevelFilter, debug, info, warn};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "ebi", author, version, about, long_about = None)]
/// Command-line arguments
struct Args {
    /// Service deployment to use. Falls back to EBI_ENVIRONMENT, then the config file.
    #[arg(long, global = true, value_enum)]
    env: Option<EnvironmentType>,

    /// Service root URL, overriding the environment's.
    #[arg(long, global = true, value_name = "URL")]
    base_url: Option<String>,

    /// More output; repeat for trace level and error details.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Only warnings and errors.
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Command to execute
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args, Default)]
struct OutputArgs {
    /// Base name for result files; `-` writes to stdout. Defaults to the job id.
    #[arg(long, value_name = "BASE")]
    outfile: Option<String>,

    /// Retrieve only the result type with this identifier.
    #[arg(long, value_name = "TYPE")]
    outformat: Option<String>,

    /// Give up waiting for the job after this many seconds (0 waits forever).
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// What to do when one result type cannot be retrieved.
    #[arg(long, value_enum, value_name = "POLICY")]
    fetch_policy: Option<FetchPolicy>,
}

impl OutputArgs {
    fn target(&self) -> OutputTarget {
        OutputTarget {
            base: self.outfile.clone(),
            format: self.outformat.clone(),
        }
    }
}

#[derive(clap::Args)]
struct RunArgs {
    /// Tool name, see `ebi tools`.
    tool: String,

    /// Contact address attached to the job.
    #[arg(long)]
    email: Option<String>,

    /// Job title.
    #[arg(long)]
    title: Option<String>,

    /// Print the job id and return without waiting.
    #[arg(long = "async")]
    submit_only: bool,

    #[command(flatten)]
    output: OutputArgs,

    /// Submit one job per record of a multi-FASTA sequence.
    #[arg(long)]
    multifasta: bool,

    /// Jobs in flight at once with --multifasta.
    #[arg(long, value_name = "N")]
    max_jobs: Option<usize>,

    /// Tool options, see `ebi usage <tool>`.
    #[arg(last = true, value_name = "TOOL_OPTIONS")]
    tool_args: Vec<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Submit a job, wait for it and retrieve its results.
    Run(RunArgs),
    /// Print the current status of a job.
    Status { tool: String, jobid: String },
    /// List the result types of a finished job.
    #[command(name = "result-types", alias = "resultTypes")]
    ResultTypes { tool: String, jobid: String },
    /// Wait for a submitted job and retrieve its results.
    #[command(alias = "polljob")]
    Poll {
        tool: String,
        jobid: String,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// List the tools this client knows.
    Tools,
    /// Show a tool's options.
    Usage { tool: String },
    /// Write a config file with the environment and contact address.
    Init {
        /// Default contact address for submitted jobs.
        #[arg(long)]
        email: Option<String>,

        /// Overwrite an existing config file.
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(if e.use_stderr() { EXIT_USAGE } else { 0 });
        }
    };

    init_logging(args.verbose, args.quiet);
    let verbose = args.verbose;
    match dispatch(args).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            report_error(&e, verbose);
            ExitCode::from(e.exit_code())
        }
    }
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => LevelFilter::Warn,
        (false, 0) => LevelFilter::Info,
        (false, 1) => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .format_target(false)
        .parse_default_env()
        .init();
}

fn report_error(e: &ClientError, verbose: u8) {
    let pretty = match e {
        ClientError::Transport(inner) => inner.to_pretty(),
        _ => None,
    };
    eprintln!("Error: {}", pretty.unwrap_or_else(|| e.to_string()));
    if e.is_usage() {
        eprintln!("See `ebi --help`, or `ebi usage <tool>` for a tool's options.");
    }
    if verbose >= 2 {
        eprintln!("{:?}", e);
    }
}

async fn dispatch(args: Args) -> Result<u8, ClientError> {
    match args.command {
        Command::Tools => list_tools(),
        Command::Usage { tool } => {
            print!("{}", ToolCatalogue::builtin()?.get(&tool)?.usage_text());
            Ok(0)
        }
        Command::Init { email, force } => init_config(args.env, args.base_url, email, force),
        Command::Run(run) => {
            let session = Session::open(args.env, args.base_url)?;
            let result = session.run(run).await;
            session.close(result).await
        }
        Command::Status { tool, jobid } => {
            let session = Session::open(args.env, args.base_url)?;
            let result = session.status(&tool, jobid).await;
            session.close(result).await
        }
        Command::ResultTypes { tool, jobid } => {
            let session = Session::open(args.env, args.base_url)?;
            let result = session.result_types(&tool, jobid).await;
            session.close(result).await
        }
        Command::Poll {
            tool,
            jobid,
            output,
        } => {
            let session = Session::open(args.env, args.base_url)?;
            let result = session.poll(&tool, jobid, &output).await;
            session.close(result).await
        }
    }
}

fn list_tools() -> Result<u8, ClientError> {
    let catalogue = ToolCatalogue::builtin()?;
    let width = catalogue
        .tools()
        .iter()
        .map(|t| t.name.len())
        .max()
        .unwrap_or(0);
    for tool in catalogue.tools() {
        println!("{:<width$}  {}", tool.name, tool.title);
    }
    Ok(0)
}

fn init_config(
    env: Option<EnvironmentType>,
    base_url: Option<String>,
    email: Option<String>,
    force: bool,
) -> Result<u8, ClientError> {
    let path = get_config_path()?;
    if path.exists() && !force {
        return Err(ClientError::usage(format!(
            "{} already exists; pass --force to overwrite it",
            path.display()
        )));
    }
    let config = Config {
        environment: env.unwrap_or_default().to_string(),
        email,
        base_url,
        ..Config::default()
    };
    config.save(&path)?;
    info!("Wrote {}", path.display());
    Ok(0)
}

/// `--env`, then `EBI_ENVIRONMENT`, then the config file.
fn resolve_environment(
    flag: Option<EnvironmentType>,
    base_url: Option<String>,
    config: &Config,
) -> Result<Environment, ClientError> {
    let configured = config.environment()?;
    let env_type = match flag {
        Some(env_type) => env_type,
        None => match std::env::var("EBI_ENVIRONMENT") {
            Ok(name) if !name.trim().is_empty() => name
                .parse::<EnvironmentType>()
                .map_err(|_| ClientError::usage(format!("Invalid environment: {}", name)))?,
            _ => configured.env_type,
        },
    };
    Ok(Environment::new(env_type).with_base_url(base_url.or(configured.base_url)))
}

fn cancel_on_ctrl_c(cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping");
            cancel.cancel();
        }
    })
}

/// Everything a controller needs, cloneable into batch tasks.
#[derive(Clone)]
struct ControllerFactory {
    environment: Environment,
    tool: String,
    poll: PollConfig,
    policy: FetchPolicy,
    writer: ResultWriter,
    events: EventSink,
    cancel: CancellationToken,
}

impl ControllerFactory {
    fn build(&self) -> Result<JobLifecycleController<RestGateway>, ClientError> {
        let gateway = RestGateway::new(&self.environment, &self.tool)?;
        Ok(JobLifecycleController::new(gateway, self.writer.clone())
            .with_poll_config(self.poll)
            .with_fetch_policy(self.policy)
            .with_events(self.events.clone())
            .with_cancellation(self.cancel.clone()))
    }
}

/// State shared by the commands that talk to the service.
struct Session {
    config: Config,
    environment: Environment,
    writer: ResultWriter,
    events: EventSink,
    cancel: CancellationToken,
    printer: JoinHandle<()>,
    interrupt: JoinHandle<()>,
}

impl Session {
    fn open(env: Option<EnvironmentType>, base_url: Option<String>) -> Result<Self, ClientError> {
        let config_path = get_config_path()?;
        let config = Config::load_or_default(&config_path).map_err(|e| {
            ClientError::Config(format!("cannot read {}: {}", config_path.display(), e))
        })?;
        let environment = resolve_environment(env, base_url, &config)?;
        debug!("Using {}", environment);

        let (sender, receiver) = mpsc::channel(EVENT_QUEUE_SIZE);
        let cancel = CancellationToken::new();
        Ok(Self {
            config,
            environment,
            writer: ResultWriter::new(),
            events: EventSink::new(sender),
            printer: spawn_progress_printer(receiver),
            interrupt: cancel_on_ctrl_c(cancel.clone()),
            cancel,
        })
    }

    /// Lets the progress printer drain before handing back `result`.
    async fn close(self, result: Result<u8, ClientError>) -> Result<u8, ClientError> {
        let Session {
            events,
            printer,
            interrupt,
            ..
        } = self;
        drop(events);
        let _ = printer.await;
        interrupt.abort();
        result
    }

    fn factory(&self, tool: &str, output: &OutputArgs) -> Result<ControllerFactory, ClientError> {
        Ok(ControllerFactory {
            environment: self.environment.clone(),
            tool: tool.to_string(),
            poll: self.config.poll_config(output.timeout)?,
            policy: output.fetch_policy.unwrap_or(self.config.fetch_policy),
            writer: self.writer.clone(),
            events: self.events.clone(),
            cancel: self.cancel.clone(),
        })
    }

    async fn run(&self, args: RunArgs) -> Result<u8, ClientError> {
        let schema = ToolCatalogue::builtin()?.get(&args.tool)?;
        let params = ArgumentBinder::new(schema)?.bind(&args.tool_args)?;
        let email = args.email.or_else(|| self.config.email.clone());
        if email.is_none() {
            warn!("No --email given; the service may refuse or throttle anonymous jobs");
        }
        let request = JobRequest::new(email, args.title, params);
        let factory = self.factory(&args.tool, &args.output)?;
        let target = args.output.target();

        if args.multifasta {
            let settings = BatchSettings {
                max_jobs: args.max_jobs.unwrap_or(self.config.max_jobs),
                submit_only: args.submit_only,
            };
            return run_multifasta(schema, &request, &target, settings, factory).await;
        }

        let mut controller = factory.build()?;
        if args.submit_only {
            let handle = controller.submit(&request).await?;
            println!("{}", handle);
            return Ok(0);
        }
        let (handle, report) = controller.run(&request, &target).await?;
        report.log(&handle);
        Ok(0)
    }

    async fn status(&self, tool: &str, jobid: String) -> Result<u8, ClientError> {
        let mut controller = self.factory(tool, &OutputArgs::default())?.build()?;
        let status = controller.status(&JobHandle::new(jobid)).await?;
        println!("{}", status);
        Ok(0)
    }

    async fn result_types(&self, tool: &str, jobid: String) -> Result<u8, ClientError> {
        let mut controller = self.factory(tool, &OutputArgs::default())?.build()?;
        for descriptor in controller.list_result_types(&JobHandle::new(jobid)).await? {
            println!("{}", descriptor);
        }
        Ok(0)
    }

    async fn poll(
        &self,
        tool: &str,
        jobid: String,
        output: &OutputArgs,
    ) -> Result<u8, ClientError> {
        let mut controller = self.factory(tool, output)?.build()?;
        let handle = JobHandle::new(jobid);
        controller.await_results(&handle).await?;
        let report = controller.retrieve(&handle, &output.target()).await?;
        report.log(&handle);
        Ok(0)
    }
}

async fn run_multifasta(
    schema: &ToolSchema,
    request: &JobRequest,
    target: &OutputTarget,
    settings: BatchSettings,
    factory: ControllerFactory,
) -> Result<u8, ClientError> {
    let option = schema.sequence_option().ok_or_else(|| {
        ClientError::usage(format!("{} takes no sequence input", schema.name))
    })?;
    let records = split_fasta(request.params.first(&option.name).unwrap_or_default());
    if records.is_empty() {
        return Err(ClientError::usage(format!("--{} holds no sequences", option.name)));
    }

    let requests = expand_requests(request, &option.name, &records);
    let cancel = factory.cancel.clone();
    let make_controller = Arc::new(move |_: usize| factory.build());
    let outcomes = run_batch(requests, target, settings, cancel, make_controller).await?;
    Ok(summarise(&outcomes))
}
