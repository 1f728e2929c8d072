//! geoquery CLI: resolve places, plan and fetch statistical queries.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};

use geoquery::config::EngineConfig;
use geoquery::engine::Engine;
use geoquery::geo::{GeographyCode, GeographyLevel, GeographyReference, ResolutionResult};
use geoquery::paths::GeoPaths;
use geoquery::query::Dataset;

#[derive(Parser)]
#[command(name = "geoquery", version, about = "Census-style geography and query resolution")]
struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/geoquery/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory for the durable store (default: $XDG_CACHE_HOME/geoquery).
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Keep everything in memory for this run.
    #[arg(long, global = true)]
    memory: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct QueryArgs {
    /// Place, e.g. "Cook County, IL".
    #[arg(long)]
    geo: String,

    /// Geography level hint (county, place, state, ...).
    #[arg(long)]
    level: Option<GeographyLevel>,

    /// Comma-separated variable codes.
    #[arg(long, value_delimiter = ',', required = true)]
    vars: Vec<String>,

    #[arg(long, default_value = "acs/acs5")]
    dataset: Dataset,

    /// Years: "2022", "2018-2023" or "2019,2021".
    #[arg(long, value_parser = parse_years)]
    years: Years,
}

#[derive(Clone)]
struct Years(Vec<u16>);

#[derive(Subcommand)]
enum Commands {
    /// Resolve a place name to a geography code.
    Resolve {
        text: String,

        #[arg(long)]
        level: Option<GeographyLevel>,

        /// Containing place, resolved at state level unless it names another.
        #[arg(long)]
        parent: Option<String>,
    },

    /// Show the requests a query would issue, without sending them.
    Plan(QueryArgs),

    /// Fetch a query for every requested year.
    Fetch {
        #[command(flatten)]
        query: QueryArgs,

        /// Print succeeded tables as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Inspect or maintain the result cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Manage the config file.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Entry count, size and hit statistics.
    Stats,
    /// Drop expired and over-limit entries.
    Evict,
    /// Drop every entry.
    Clear,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a config file with default values.
    Init {
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration.
    Show,
}

fn parse_years(input: &str) -> std::result::Result<Years, String> {
    let mut years = Vec::new();
    for part in input.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let parse = |s: &str| {
            s.trim()
                .parse::<u16>()
                .map_err(|_| format!("not a year: {s:?}"))
        };
        match part.split_once('-') {
            Some((from, to)) => {
                let (from, to) = (parse(from)?, parse(to)?);
                if from > to {
                    return Err(format!("empty range {part}"));
                }
                years.extend(from..=to);
            }
            None => years.push(parse(part)?),
        }
    }
    if years.is_empty() {
        return Err("no years given".into());
    }
    Ok(Years(years))
}

fn load_config(cli: &Cli, paths: &GeoPaths) -> Result<(PathBuf, EngineConfig)> {
    let path = cli.config.clone().unwrap_or_else(|| paths.config_file());
    let mut config = EngineConfig::load_or_default(&path)?.with_env();
    if cli.memory {
        config.data_dir = None;
    } else if let Some(dir) = &cli.data_dir {
        config.data_dir = Some(dir.clone());
    } else if config.data_dir.is_none() {
        config.data_dir = Some(paths.store_dir());
    }
    Ok((path, config))
}

fn print_resolution(result: &ResolutionResult) {
    match result {
        ResolutionResult::Resolved {
            geography,
            confidence,
        } => {
            println!("{geography}  confidence {confidence:.2}");
        }
        ResolutionResult::Ambiguous(candidates) => {
            println!("ambiguous; candidates:");
            for c in candidates {
                println!("  {}  confidence {:.2}", c.geography, c.confidence);
            }
        }
        ResolutionResult::Unresolved => println!("no match"),
    }
}

fn resolve_one(engine: &Engine, args: &QueryArgs) -> Result<Arc<GeographyCode>> {
    let result = engine.resolve_geography(&args.geo, args.level, None)?;
    match result {
        ResolutionResult::Resolved { geography, .. } => Ok(geography),
        other => {
            print_resolution(&other);
            miette::bail!("\"{}\" does not resolve to a single geography", args.geo)
        }
    }
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let paths = GeoPaths::resolve()?;
    let (config_path, config) = load_config(&cli, &paths)?;

    match cli.command {
        Commands::Resolve {
            text,
            level,
            parent,
        } => {
            let engine = Engine::new(config)?;
            let parent = parent.map(|p| {
                let reference = GeographyReference::parse(&p);
                match reference.level {
                    Some(_) => reference,
                    None => reference.with_level(GeographyLevel::State),
                }
            });
            let result = engine.resolve_geography(&text, level, parent)?;
            print_resolution(&result);
            engine.persist()?;
        }

        Commands::Plan(args) => {
            let engine = Engine::new(config)?;
            let geography = resolve_one(&engine, &args)?;
            let plan = engine.plan_queries(geography, args.vars.clone(), &args.dataset, &args.years.0)?;
            for spec in &plan.specs {
                println!("{spec}");
            }
            for issue in &plan.issues {
                println!("note {issue}");
            }
            engine.persist()?;
        }

        Commands::Fetch { query, json } => {
            let engine = Engine::new(config)?;
            let geography = resolve_one(&engine, &query)?;
            let series = engine.fetch_series(
                geography,
                query.vars.clone(),
                &query.dataset,
                &query.years.0,
                None,
            )?;
            if json {
                let out = serde_json::to_string_pretty(&series.succeeded).into_diagnostic()?;
                println!("{out}");
            } else {
                for (year, table) in &series.succeeded {
                    println!("{year}: {} row(s), columns {}", table.len(), table.columns().join(","));
                }
            }
            for (year, failure) in &series.failed {
                eprintln!("{year}: {} ({})", failure.kind, failure.detail);
            }
            for issue in series.issues.iter().filter(|i| i.failure().is_none()) {
                eprintln!("note {issue}");
            }
            engine.persist()?;
        }

        Commands::Cache { action } => {
            let engine = Engine::new(config)?;
            let cache = engine.cache();
            match action {
                CacheAction::Stats => {
                    let out = serde_json::to_string_pretty(&cache.stats()).into_diagnostic()?;
                    println!("{out}");
                }
                CacheAction::Evict => {
                    let report = cache.evict()?;
                    println!(
                        "evicted {} entries ({} expired, {} over limit), {} bytes freed",
                        report.total(),
                        report.expired,
                        report.over_capacity,
                        report.bytes_freed
                    );
                }
                CacheAction::Clear => {
                    let removed = cache.clear()?;
                    println!("removed {removed} entries");
                }
            }
            engine.persist()?;
        }

        Commands::Config { action } => match action {
            ConfigAction::Init { force } => {
                if config_path.exists() && !force {
                    miette::bail!(
                        help = "pass --force to overwrite",
                        "config already exists at {}",
                        config_path.display()
                    );
                }
                paths.ensure_dirs()?;
                EngineConfig::default().save(&config_path)?;
                println!("wrote {}", config_path.display());
            }
            ConfigAction::Show => {
                let mut shown = config.clone();
                if shown.api_key.is_some() {
                    shown.api_key = Some("<set>".into());
                }
                let out = toml::to_string_pretty(&shown).into_diagnostic()?;
                println!("# {}", config_path.display());
                print!("{out}");
            }
        },
    }

    Ok(())
}
