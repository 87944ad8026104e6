use std::fmt;
use std::sync::Arc;

use exam_core::model::UserId;
use services::{AppServices, Clock, ExamConfig};
use storage::auth::{AuthSession, LocalAuth};
use storage::repository::Storage;
use storage::rows::BankImport;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod terminal;

const DEFAULT_LOG_FILTER: &str = "app=info,services=info,storage=info";

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    InvalidUserId { raw: String },
    InvalidDbUrl { raw: String },
    MissingTopic,
    MissingFile,
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidUserId { raw } => write!(f, "invalid --user value: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::MissingTopic => write!(f, "take requires --topic <slug> or EXAM_TOPIC"),
            ArgsError::MissingFile => write!(f, "seed requires --file <bank.json>"),
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Take,
    Topics,
    Seed,
}

impl Command {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "take" => Some(Self::Take),
            "topics" => Some(Self::Topics),
            "seed" => Some(Self::Seed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Args {
    db_url: String,
    user_id: Option<UserId>,
    topic: Option<String>,
    file: Option<String>,
}

impl Args {
    fn from_env() -> Result<Self, ArgsError> {
        let db_url = std::env::var("EXAM_DB_URL")
            .ok()
            .map_or_else(|| "sqlite://exam.sqlite3".into(), normalize_sqlite_url);
        let user_id = std::env::var("EXAM_USER_ID")
            .ok()
            .filter(|raw| !raw.trim().is_empty())
            .map(|raw| parse_user_id(&raw))
            .transpose()?;
        let topic = std::env::var("EXAM_TOPIC")
            .ok()
            .filter(|raw| !raw.trim().is_empty());
        Ok(Self {
            db_url,
            user_id,
            topic,
            file: None,
        })
    }

    fn parse(mut self, args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    self.db_url = normalize_sqlite_url(value);
                }
                "--user" => {
                    let value = require_value(args, "--user")?;
                    self.user_id = Some(parse_user_id(&value)?);
                }
                "--topic" => self.topic = Some(require_value(args, "--topic")?),
                "--file" => self.file = Some(require_value(args, "--file")?),
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }
        Ok(self)
    }
}

fn parse_user_id(raw: &str) -> Result<UserId, ArgsError> {
    raw.parse().map_err(|_| ArgsError::InvalidUserId {
        raw: raw.to_owned(),
    })
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p app -- take   --topic <slug> [--user <uuid>] [--db <sqlite_url>]");
    eprintln!("  cargo run -p app -- topics [--db <sqlite_url>]");
    eprintln!("  cargo run -p app -- seed   --file <bank.json> [--db <sqlite_url>]");
    eprintln!();
    eprintln!("Defaults:");
    eprintln!("  --db sqlite://exam.sqlite3");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  EXAM_DB_URL, EXAM_USER_ID, EXAM_TOPIC, EXAM_LOG (or RUST_LOG)");
}

fn normalize_sqlite_url(raw: String) -> String {
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") {
        return raw;
    }

    let trimmed = raw.trim().to_string();
    let path_str = trimmed
        .strip_prefix("sqlite:")
        .unwrap_or(trimmed.as_str())
        .to_string();
    let path = std::path::Path::new(&path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| std::path::PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    if db_url == "sqlite::memory:" {
        return Ok(());
    }

    let path = db_url
        .strip_prefix("sqlite://")
        .ok_or_else(|| ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        })?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        }
        .into());
    }

    let path = std::path::Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("EXAM_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn take(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let slug = args.topic.ok_or(ArgsError::MissingTopic)?;
    let auth = LocalAuth::new();
    let services = AppServices::new_sqlite(
        &args.db_url,
        Arc::new(auth.clone()),
        Clock::default_clock(),
        ExamConfig::default(),
    )
    .await?;

    if let Some(user_id) = args.user_id {
        auth.sign_in(AuthSession {
            user_id,
            email: None,
        })?;
    }
    let mut status = services.gate().subscribe_status();
    let _auth_watch = services.gate().watch_auth();
    let status = status
        .settled()
        .await
        .unwrap_or_else(|| services.gate().status());
    if !status.is_allowed() {
        println!("Cannot start a test: {status}.");
        return Ok(());
    }
    tracing::info!(topic = %slug, "starting test");

    terminal::run(services.flow(), &slug).await
}

async fn topics(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let storage = Storage::sqlite(&args.db_url).await?;
    let catalog = storage.bank.list_topics().await?;
    if catalog.is_empty() {
        println!("No topics yet. Import some with `seed --file <bank.json>`.");
    }
    for summary in catalog {
        println!(
            "{:<24} {:>4} questions  {}",
            summary.topic.slug(),
            summary.question_count,
            summary.topic.title()
        );
    }
    Ok(())
}

async fn seed(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let file = args.file.ok_or(ArgsError::MissingFile)?;
    let raw = std::fs::read_to_string(&file)?;
    let import = BankImport::from_json(&raw)?;
    let storage = Storage::sqlite(&args.db_url).await?;
    let summary = import.apply(&storage).await?;
    println!(
        "Imported {} topic(s), {} question(s) and {} entitlement(s) into {}",
        summary.topics, summary.questions, summary.entitlements, args.db_url
    );
    Ok(())
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut argv: Vec<String> = std::env::args().skip(1).collect();

    // Default behavior: take a test when no subcommand is provided.
    let cmd = match argv.first().map(String::as_str) {
        None => Command::Take,
        Some("--help" | "-h") => {
            print_usage();
            return Ok(());
        }
        Some(first) if first.starts_with("--") => Command::Take,
        Some(first) => Command::from_arg(first).ok_or_else(|| {
            eprintln!("unknown subcommand: {first}");
            print_usage();
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "unknown subcommand")
        })?,
    };
    if !argv.is_empty() && !argv[0].starts_with("--") {
        argv.remove(0);
    }

    let parsed = Args::from_env()
        .and_then(|args| args.parse(&mut argv.into_iter()))
        .map_err(|e| {
            eprintln!("{e}");
            print_usage();
            e
        })?;

    prepare_sqlite_file(&parsed.db_url)?;

    match cmd {
        Command::Take => take(parsed).await,
        Command::Topics => topics(parsed).await,
        Command::Seed => seed(parsed).await,
    }
}

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
