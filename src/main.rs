use anyhow::{bail, Context, Result};
use apidae::config::{default_options_path, load_options_file};
use apidae::ApidaeClient;
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{Map, Value};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Command line client for the Apidae tourism API
#[derive(Parser, Debug)]
#[command(name = "apidae", version, about, long_about = None)]
struct Args {
    /// Options file (YAML, or JSON with a .json extension)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// API key (overrides APIDAE_API_KEY and the options file)
    #[arg(long)]
    api_key: Option<String>,

    /// Project id (overrides APIDAE_PROJECT_ID and the options file)
    #[arg(long)]
    project_id: Option<String>,

    /// Log level for debugging
    #[arg(long, value_enum, default_value = "off")]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Execute an operation and print its result as JSON
    Exec {
        operation: String,

        /// Parameter as key=value (repeatable)
        #[arg(short = 'p', long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,

        /// Parameters as a JSON object; -p values take precedence
        #[arg(long)]
        json: Option<String>,
    },
    /// List available operations
    List {
        /// Only operations of this group
        #[arg(long)]
        group: Option<String>,
    },
    /// Show the descriptor of an operation
    Describe { operation: String },
    /// Print one effective configuration option
    Config { key: String },
    /// Print the SSO authorization URL
    SsoUrl,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got `{raw}`")),
    }
}

fn setup_logging(level: LogLevel) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let Some(tracing_level) = level.to_tracing_level() else {
        return Ok(None);
    };

    let log_path = get_log_path();

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file {}", log_path.display()))?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    tracing_subscriber::fmt()
        .with_max_level(tracing_level)
        .with_writer(non_blocking.with_max_level(tracing_level))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("apidae started with log level: {:?}", level);
    tracing::info!("Log file: {:?}", log_path);

    Ok(Some(guard))
}

fn get_log_path() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("apidae").join("apidae.log");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".apidae").join("apidae.log");
    }
    PathBuf::from("apidae.log")
}

/// Options file, then environment, then command line flags
fn load_options(args: &Args) -> Result<Value> {
    let mut options = match &args.config {
        Some(path) => load_options_file(path)
            .with_context(|| format!("Failed to load options from {}", path.display()))?,
        None => match default_options_path().filter(|path| path.exists()) {
            Some(path) => load_options_file(&path)
                .with_context(|| format!("Failed to load options from {}", path.display()))?,
            None => Value::Object(Map::new()),
        },
    };

    let Value::Object(map) = &mut options else {
        bail!("Options file must contain a mapping");
    };

    let overrides = [
        ("apiKey", std::env::var("APIDAE_API_KEY").ok(), args.api_key.clone()),
        ("projetId", std::env::var("APIDAE_PROJECT_ID").ok(), args.project_id.clone()),
    ];
    for (key, from_env, from_flag) in overrides {
        if let Some(value) = from_flag.or(from_env) {
            map.insert(key.to_string(), Value::String(value));
        }
    }

    Ok(options)
}

fn command_params(params: Vec<(String, String)>, json: Option<&str>) -> Result<Value> {
    let mut map = match json {
        Some(raw) => match serde_json::from_str(raw).context("Invalid --json parameters")? {
            Value::Object(map) => map,
            _ => bail!("--json parameters must be a JSON object"),
        },
        None => Map::new(),
    };
    for (key, value) in params {
        map.insert(key, Value::String(value));
    }
    Ok(Value::Object(map))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let _log_guard = setup_logging(args.log_level)?;

    let options = load_options(&args)?;
    let client = ApidaeClient::new(&options).context("Failed to initialize Apidae client")?;

    match args.command {
        Command::Exec {
            operation,
            params,
            json,
        } => {
            let params = command_params(params, json.as_deref())?;
            let result = client
                .execute(&operation, params)
                .await
                .with_context(|| format!("{operation} failed"))?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        },
        Command::List { group } => {
            if let Some(group) = group.as_deref() {
                if !apidae::OperationRegistry::builtin_groups().any(|g| g == group) {
                    let known: Vec<&str> = apidae::OperationRegistry::builtin_groups().collect();
                    bail!("unknown group `{group}`, expected one of: {}", known.join(", "));
                }
            }
            let registry = client.registry();
            for name in registry.names() {
                let op_group = registry.group_of(name).unwrap_or_default();
                if group.as_deref().is_some_and(|g| g != op_group) {
                    continue;
                }
                let summary = registry
                    .lookup(name)
                    .ok()
                    .and_then(|d| d.summary.clone())
                    .unwrap_or_default();
                println!("{name:<34} {op_group:<18} {summary}");
            }
        },
        Command::Describe { operation } => {
            let descriptor = client.registry().lookup(&operation)?;
            println!("{}", serde_json::to_string_pretty(&*descriptor)?);
        },
        Command::Config { key } => match client.config(&key) {
            Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
            None => bail!("Option `{key}` is not set"),
        },
        Command::SsoUrl => {
            println!("{}", client.sso().authorize_url()?);
        },
    }

    Ok(())
}
