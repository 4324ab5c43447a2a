//! HTTPS Upgrade CLI
//!
//! CLI tool for compiling rulesets, inspecting stores and trying lookups.

mod snapshot;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use log::LevelFilter;
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::config::{Appender, Root};
use log4rs::encode::pattern::PatternEncoder;
use serde::Serialize;

use httpse_core::store::{SectionId, Snapshot, HXS_MAGIC};
use httpse_core::{HttpsUpgradeService, ServiceConfig};

use crate::snapshot::{compile_store_bytes, read_store, write_store};

#[derive(Parser)]
#[command(name = "httpse-cli")]
#[command(about = "HTTPS upgrade ruleset compiler and tools")]
struct Cli {
    /// Log level for diagnostics on stderr
    #[arg(long, global = true, default_value = "warn")]
    log_level: LevelFilter,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile JSON rulesets into an HXS store
    Compile {
        /// Input ruleset files
        #[arg(short, long, required = true)]
        input: Vec<String>,

        /// Output store file
        #[arg(short, long, default_value = "rules.hxs")]
        output: PathBuf,

        /// Build id stamped into the store header
        #[arg(long, default_value_t = 0)]
        build_id: u32,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate an HXS store
    Validate {
        /// Store file to validate
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Dump store info
    Info {
        /// Store file to inspect
        #[arg(short, long)]
        input: PathBuf,

        /// Also list every host key
        #[arg(long)]
        hosts: bool,
    },

    /// Look URLs up the way the service would
    Lookup {
        /// Store file (overrides the config's store_path)
        #[arg(short, long)]
        store: Option<PathBuf>,

        /// Service config JSON
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Request id used for every lookup
        #[arg(long, default_value_t = 1)]
        request_id: u64,

        /// Print results as JSON
        #[arg(long)]
        json: bool,

        /// URLs to look up
        #[arg(required = true)]
        urls: Vec<String>,
    },
}

#[derive(Serialize)]
struct LookupResult<'a> {
    url: &'a str,
    rewritten: Option<String>,
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.log_level) {
        eprintln!("Warning: logging disabled: {e}");
    }

    let result = match cli.command {
        Commands::Compile {
            input,
            output,
            build_id,
            verbose,
        } => cmd_compile(&input, &output, build_id, verbose),
        Commands::Validate { input } => cmd_validate(&input),
        Commands::Info { input, hosts } => cmd_info(&input, hosts),
        Commands::Lookup {
            store,
            config,
            request_id,
            json,
            urls,
        } => cmd_lookup(store, config, request_id, json, &urls),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn init_logging(level: LevelFilter) -> Result<(), String> {
    let appender = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new("{l:<5} {t} - {m}{n}")))
        .build();
    let config = log4rs::Config::builder()
        .appender(Appender::builder().build("stderr", Box::new(appender)))
        .build(Root::builder().appender("stderr").build(level))
        .map_err(|e| e.to_string())?;
    log4rs::init_config(config).map_err(|e| e.to_string())?;
    Ok(())
}

fn cmd_compile(inputs: &[String], output: &Path, build_id: u32, verbose: bool) -> Result<(), String> {
    let (bytes, stats) = compile_store_bytes(inputs, build_id, verbose)?;
    write_store(output, &bytes)?;

    let opt = &stats.optimize;
    println!("Compiled {} ruleset files to '{}'", inputs.len(), output.display());
    println!("  Hosts:    {} -> {} (merged {}, empty {})", opt.hosts_before, opt.hosts_after, opt.merged_hosts, opt.empty_hosts);
    println!("  Rules:    {} -> {} (deduped {}, invalid {})", opt.rules_before, opt.rules_after, opt.deduped, opt.invalid_rules);
    println!("  Size:     {} bytes ({:.1} KB) from {} source bytes", bytes.len(), bytes.len() as f64 / 1024.0, stats.source_bytes);
    println!("  Time:     {:.1}ms", stats.total_ms);

    Ok(())
}

fn cmd_validate(input: &Path) -> Result<(), String> {
    let snapshot = read_store(input)?;

    println!("Store '{}' is valid", input.display());
    println!("  Version:     {}", snapshot.version);
    println!("  Build:       {}", snapshot.build_id);
    println!("  Sections:    {}", snapshot.section_count());
    println!("  Size:        {} bytes", snapshot.byte_len());

    Ok(())
}

fn cmd_info(input: &Path, list_hosts: bool) -> Result<(), String> {
    let snapshot = read_store(input)?;

    println!("Store: {}", input.display());
    println!("  Magic:       {}", String::from_utf8_lossy(&HXS_MAGIC));
    println!("  Version:     {}", snapshot.version);
    println!("  Flags:       {:?}", snapshot.flags);
    println!("  Build:       {}", snapshot.build_id);
    println!("  Total size:  {} bytes ({:.1} KB)", snapshot.byte_len(), snapshot.byte_len() as f64 / 1024.0);
    println!();

    println!("Sections:");
    for id in SectionId::ALL {
        if let Some(info) = snapshot.get_section_info(id) {
            println!("  {:<12} offset {:>8}  length {:>8}", format!("{id:?}"), info.offset, info.length);
        }
    }
    println!();

    println!("Host Index:");
    println!("  Entries:     {} (capacity {})", snapshot.host_index_count(), snapshot.host_index_capacity());
    println!("Records:");
    println!("  Rulesets:    {}", snapshot.ruleset_count());
    println!("  Rules:       {}", snapshot.rule_count());
    println!("  Exclusions:  {}", snapshot.exclusion_count());

    if list_hosts {
        println!();
        print_hosts(&snapshot);
    }

    Ok(())
}

fn print_hosts(snapshot: &Snapshot) {
    println!("Hosts:");
    for (id, host) in snapshot.hosts().enumerate() {
        let rules = snapshot.ruleset(id).map_or(0, |r| r.rules.len());
        println!("  {host} ({rules} rules)");
    }
}

fn cmd_lookup(
    store: Option<PathBuf>,
    config_path: Option<PathBuf>,
    request_id: u64,
    json: bool,
    urls: &[String],
) -> Result<(), String> {
    let mut config = match &config_path {
        Some(path) => ServiceConfig::from_file(path).map_err(|e| e.to_string())?,
        None => ServiceConfig::default(),
    };
    match store {
        Some(path) => config.store_path = path,
        None if config_path.is_none() => {
            return Err("Either --store or --config is required".to_string());
        }
        None => {}
    }
    if !config.store_path.exists() {
        return Err(format!("Store '{}' does not exist", config.store_path.display()));
    }

    let service = HttpsUpgradeService::init(config).map_err(|e| e.to_string())?;

    let results: Vec<LookupResult> = urls
        .iter()
        .map(|url| LookupResult {
            url,
            rewritten: service.get_https_url(url, request_id),
        })
        .collect();

    if json {
        let out = serde_json::to_string_pretty(&results).map_err(|e| e.to_string())?;
        println!("{out}");
    } else {
        for result in &results {
            match &result.rewritten {
                Some(rewritten) => println!("{} -> {}", result.url, rewritten),
                None => println!("{} (unchanged)", result.url),
            }
        }
    }

    service.cleanup();
    Ok(())
}
