// Module-specific lints configuration
#![allow(clippy::uninlined_format_args)]

use anyhow::{Context, Result, anyhow};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{Shell, generate};
use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError, debug, info, warn};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use multilingual::app_config::{self, Config};
use multilingual::database::ValuesRow;
use multilingual::language_utils::{field_suffix, get_native_name};
use multilingual::{
    DatabaseConnection, Entity, EntityDraft, FetchStrategy, LanguageContext, Predicate, Query,
    TranslationRepository, Value,
};

/// CLI Wrapper for LogLevel to implement ValueEnum
#[derive(Debug, Clone, ValueEnum)]
enum CliLogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<CliLogLevel> for app_config::LogLevel {
    fn from(cli_level: CliLogLevel) -> Self {
        match cli_level {
            CliLogLevel::Error => app_config::LogLevel::Error,
            CliLogLevel::Warn => app_config::LogLevel::Warn,
            CliLogLevel::Info => app_config::LogLevel::Info,
            CliLogLevel::Debug => app_config::LogLevel::Debug,
            CliLogLevel::Trace => app_config::LogLevel::Trace,
        }
    }
}

/// CLI Wrapper for FetchStrategy to implement ValueEnum
#[derive(Debug, Clone, ValueEnum)]
enum CliFetchStrategy {
    Deferred,
    SelectRelated,
    Prefetch,
}

impl From<CliFetchStrategy> for FetchStrategy {
    fn from(strategy: CliFetchStrategy) -> Self {
        match strategy {
            CliFetchStrategy::Deferred => FetchStrategy::Deferred,
            CliFetchStrategy::SelectRelated => FetchStrategy::SelectRelated,
            CliFetchStrategy::Prefetch => FetchStrategy::Prefetch,
        }
    }
}

#[derive(Parser, Debug)]
struct QueryArgs {
    /// Entity type
    entity: String,

    /// Filter as FIELD[__LOOKUP]=VALUE (repeatable, AND-ed)
    #[arg(short, long = "filter", value_name = "FIELD=VALUE")]
    filters: Vec<String>,

    /// Exclude entities matching FIELD[__LOOKUP]=VALUE (repeatable)
    #[arg(short = 'x', long = "exclude", value_name = "FIELD=VALUE")]
    excludes: Vec<String>,

    /// Ordering key; prefix with '-' for descending (repeatable)
    #[arg(short, long = "order-by", value_name = "FIELD")]
    order_by: Vec<String>,

    /// Maximum number of results
    #[arg(long)]
    limit: Option<u64>,

    /// Number of results to skip
    #[arg(long)]
    offset: Option<u64>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the configured tables (and a default config if missing)
    Init,

    /// List configured languages
    Languages,

    /// Print selected fields of matching entities as JSON lines
    List {
        #[command(flatten)]
        query: QueryArgs,

        /// Fields to print, comma-separated; every field when omitted
        #[arg(long, value_delimiter = ',')]
        fields: Vec<String>,
    },

    /// Count matching entities
    Count {
        #[command(flatten)]
        query: QueryArgs,
    },

    /// Show one entity with every stored translation
    Get {
        /// Entity type
        entity: String,

        /// Primary key
        id: i64,

        /// How translations are fetched
        #[arg(long, value_enum, default_value = "prefetch")]
        strategy: CliFetchStrategy,
    },

    /// Create an entity from FIELD=VALUE pairs
    Create {
        /// Entity type
        entity: String,

        /// Values such as description=d title_en=content title=obsah
        #[arg(value_name = "FIELD=VALUE", required = true)]
        values: Vec<String>,
    },

    /// Update fields of an entity
    Set {
        /// Entity type
        entity: String,

        /// Primary key
        id: i64,

        /// Values such as title_en=content
        #[arg(value_name = "FIELD=VALUE", required = true)]
        values: Vec<String>,
    },

    /// Delete matching entities and their translations
    Delete {
        #[command(flatten)]
        query: QueryArgs,
    },

    /// Delete translations of an entity except the kept languages
    DeleteTranslations {
        /// Entity type
        entity: String,

        /// Primary key
        id: i64,

        /// Languages to keep, comma-separated
        #[arg(long, value_delimiter = ',')]
        keep: Vec<String>,
    },

    /// Show row counts, optionally vacuuming first
    Stats {
        /// Run VACUUM before collecting statistics
        #[arg(long)]
        vacuum: bool,
    },

    /// Generate shell completions for multilingual
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// multilingual - per-language translations over SQLite
///
/// Stores language-invariant fields in a master table and translated
/// fields in one row per (entity, language).
#[derive(Parser, Debug)]
#[command(name = "multilingual")]
#[command(version)]
#[command(about = "Per-language translations over SQLite")]
#[command(long_about = "multilingual reads and writes translated entities declared in conf.json.

EXAMPLES:
    multilingual init                                   # Create tables for configured entities
    multilingual -l en list basic --fields id,title     # Titles in English, falling back to the default
    multilingual list basic -f title_cs__startswith=ob  # Filter on the Czech title only
    multilingual create basic description=d title_cs=obsah title_en=content
    multilingual -l de set basic 1 title=Inhalt         # Writes the German translation
    multilingual delete-translations basic 1 --keep cs
    multilingual completions bash > multilingual.bash

FIELD NAMES:
    title       translatable field in the active language (--language) with fallback
    title_en    translatable field in one language, no fallback
    description plain field of the master table")]
struct CommandLineOptions {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = "conf.json")]
    config_path: String,

    /// Active language for this command; the configured default when omitted
    #[arg(short, long, env = "MULTILINGUAL_LANGUAGE")]
    language: Option<String>,

    /// Set logging level
    #[arg(long, value_enum)]
    log_level: Option<CliLogLevel>,
}

// @struct: Custom logger implementation
struct CustomLogger {
    level: LevelFilter,
}

impl CustomLogger {
    // @creates: New logger with specified level
    fn new(level: LevelFilter) -> Self {
        CustomLogger { level }
    }

    // @initializes: Global logger
    fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
        let logger = Box::new(CustomLogger::new(level));
        log::set_boxed_logger(logger)?;
        log::set_max_level(level);
        Ok(())
    }

    // @returns: ANSI color for log level
    fn color_for_level(level: Level) -> &'static str {
        match level {
            Level::Error => "\x1B[1;31m",
            Level::Warn => "\x1B[1;33m",
            Level::Info => "\x1B[1;32m",
            Level::Debug => "\x1B[1;36m",
            Level::Trace => "\x1B[1;35m",
        }
    }
}

impl Log for CustomLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let now = chrono::Local::now().format("%H:%M:%S.%3f");
            let mut stderr = std::io::stderr();
            let _ = writeln!(
                stderr,
                "{}{} {:<5} {}\x1B[0m",
                Self::color_for_level(record.level()),
                now,
                record.level(),
                record.args()
            );
        }
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

fn main() -> Result<()> {
    // Trace is the ceiling; the effective level is set once the config is loaded
    CustomLogger::init(LevelFilter::Trace)?;
    log::set_max_level(LevelFilter::Info);

    let cli = CommandLineOptions::parse();

    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = CommandLineOptions::command();
        generate(*shell, &mut cmd, "multilingual", &mut std::io::stdout());
        return Ok(());
    }

    if let Some(level) = &cli.log_level {
        log::set_max_level(app_config::LogLevel::from(level.clone()).to_level_filter());
    }

    let config = load_config(&cli)?;
    config.validate().context("Configuration validation failed")?;

    if cli.log_level.is_none() {
        log::set_max_level(config.log_level.to_level_filter());
    }

    let settings = Arc::new(config.language_settings()?);
    let repo = open_repository(&config, Arc::clone(&settings), matches!(cli.command, Commands::Init))?;

    // One context per command; the language stays locked for its duration only
    let ctx = LanguageContext::new(settings);
    let language = cli.language.clone().unwrap_or_else(|| ctx.get_active());
    ctx.lock(&language)
        .with_context(|| format!("Cannot activate language '{}'", language))?;
    debug!("Active language: {}", ctx.get_active());

    let result = run_command(&cli.command, &repo, &ctx, &config);
    ctx.release()?;
    result
}

fn load_config(cli: &CommandLineOptions) -> Result<Config> {
    let config_path = &cli.config_path;
    if Path::new(config_path).exists() {
        let mut config = Config::from_file(config_path)?;
        if let Some(log_level) = &cli.log_level {
            config.log_level = log_level.clone().into();
        }
        Ok(config)
    } else if matches!(cli.command, Commands::Init) {
        warn!("Config file not found at '{}', creating default config.", config_path);
        let config = Config::default();
        config.save(config_path)?;
        Ok(config)
    } else {
        Err(anyhow!(
            "Config file not found at '{}'. Run 'multilingual init' first.",
            config_path
        ))
    }
}

fn open_repository(
    config: &Config,
    settings: Arc<multilingual::LanguageSettings>,
    create_tables: bool,
) -> Result<TranslationRepository> {
    let db_path = config.database_path()?;
    let db = DatabaseConnection::new(&db_path)
        .with_context(|| format!("Failed to open database: {:?}", db_path))?;
    let repo = TranslationRepository::open(db, settings, config.entities.clone(), create_tables)
        .context("Failed to register entities")?;
    Ok(repo)
}

fn run_command(command: &Commands, repo: &TranslationRepository, ctx: &LanguageContext, config: &Config) -> Result<()> {
    match command {
        Commands::Init => {
            info!(
                "Database ready at {:?} with {} entity type(s)",
                repo.db().path(),
                config.entities.len()
            );
        }
        Commands::Languages => {
            let settings = ctx.settings();
            for (code, name) in ctx.names() {
                let marker = if code == settings.default_code() { " (default)" } else { "" };
                let native = get_native_name(code).unwrap_or_else(|_| name.clone());
                println!("{}\t{}\t{}{}", code, name, native, marker);
            }
        }
        Commands::List { query, fields } => {
            let names: Vec<&str> = fields.iter().map(String::as_str).collect();
            for row in repo.values(ctx, &build_query(query)?, &names)? {
                println!("{}", row_to_json(&row));
            }
        }
        Commands::Count { query } => {
            println!("{}", repo.count(ctx, &build_query(query)?)?);
        }
        Commands::Get { entity, id, strategy } => {
            let query = Query::new(entity).filter(Predicate::new("id", *id));
            let found = repo.fetch(ctx, &query, strategy.clone().into())?;
            let mut entity = found
                .into_iter()
                .next()
                .ok_or_else(|| anyhow!("{} #{} does not exist", entity, id))?;
            print_entity(repo, &mut entity, ctx)?;
        }
        Commands::Create { entity, values } => {
            let schema = repo.registry().get(entity)?;
            let draft = EntityDraft::from_fields(&schema, ctx, &parse_assignments(values)?)?;
            let mut created = repo.create(entity, &draft)?;
            info!("Created {} #{}", entity, created.id);
            print_entity(repo, &mut created, ctx)?;
        }
        Commands::Set { entity, id, values } => {
            let mut found = repo.get_by_id(ctx, entity, *id)?;
            let assignments = parse_assignments(values)?;
            let changes: Vec<(&str, Value)> = assignments.iter().map(|(k, v)| (*k, v.clone())).collect();
            repo.update(ctx, &mut found, &changes)?;
            print_entity(repo, &mut found, ctx)?;
        }
        Commands::Delete { query } => {
            let removed = repo.delete_where(ctx, &build_query(query)?)?;
            info!("Deleted {} {} entity(ies)", removed, query.entity);
        }
        Commands::DeleteTranslations { entity, id, keep } => {
            let mut found = repo.get_by_id(ctx, entity, *id)?;
            let keep: Vec<&str> = keep.iter().map(String::as_str).collect();
            let removed = repo.delete_translations(&mut found, &keep)?;
            info!("Deleted {} translation(s) of {} #{}", removed, entity, id);
        }
        Commands::Stats { vacuum } => {
            if *vacuum {
                repo.vacuum()?;
            }
            println!("{}", repo.stats()?);
        }
        Commands::Completions { .. } => {}
    }
    Ok(())
}

fn parse_assignments(values: &[String]) -> Result<Vec<(&str, Value)>> {
    values
        .iter()
        .map(|pair| {
            let (field, raw) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("Expected FIELD=VALUE, got '{}'", pair))?;
            Ok((field.trim(), Value::parse_literal(raw)))
        })
        .collect()
}

fn parse_predicate(condition: &str) -> Result<Predicate> {
    let (path, raw) = condition
        .split_once('=')
        .ok_or_else(|| anyhow!("Expected FIELD=VALUE, got '{}'", condition))?;
    let path = path.trim();
    Ok(match path.strip_suffix("__in") {
        Some(field) => Predicate::is_in(field, raw.split(',').map(Value::parse_literal)),
        None => Predicate::new(path, Value::parse_literal(raw)),
    })
}

fn build_query(args: &QueryArgs) -> Result<Query> {
    let mut query = Query::new(&args.entity);
    for condition in &args.filters {
        query = query.filter(parse_predicate(condition)?);
    }
    for condition in &args.excludes {
        query = query.exclude(parse_predicate(condition)?);
    }
    if !args.order_by.is_empty() {
        let keys: Vec<&str> = args.order_by.iter().map(String::as_str).collect();
        query = query.order_by(&keys);
    }
    if let Some(limit) = args.limit {
        query = query.limit(limit);
    }
    if let Some(offset) = args.offset {
        query = query.offset(offset);
    }
    Ok(query)
}

fn row_to_json(row: &ValuesRow) -> serde_json::Value {
    let map = row
        .columns
        .iter()
        .map(|(name, value)| (name.clone(), serde_json::to_value(value).unwrap_or_default()))
        .collect::<serde_json::Map<_, _>>();
    serde_json::Value::Object(map)
}

/// Print plain and resolved fields, then every language's values
///
/// Reads go through the repository so languages the fetch skipped are
/// loaded on demand.
fn print_entity(repo: &TranslationRepository, entity: &mut Entity, ctx: &LanguageContext) -> Result<()> {
    let schema = Arc::clone(entity.schema());
    let names = ctx.names();

    println!("{} #{}", entity.entity_type(), entity.id);
    for field in schema.master_fields.iter().chain(&schema.translatable_fields) {
        println!("  {} = {}", field, repo.get_field(ctx, entity, field)?);
    }
    for code in ctx.settings().codes() {
        let name = names.get(code).map(String::as_str).unwrap_or(code.as_str());
        println!("  [{}] {}", code, name);
        for field in &schema.translatable_fields {
            let explicit = format!("{}_{}", field, field_suffix(code));
            println!("    {} = {}", field, repo.get_field(ctx, entity, &explicit)?);
        }
    }
    Ok(())
}
