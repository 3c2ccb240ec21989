//! Autotag CLI application entry point
//!
//! # Usage
//!
//! ```bash
//! # Check an expression
//! autotag check 'isComplete() && seedingfor > d2s(7)'
//!
//! # Validate tag references too
//! autotag check 'hasTag("Movies") && sizegb > 4' -t Movies
//!
//! # Run a rules file over a subject snapshot
//! autotag apply -r rules.toml -s subjects.json
//! autotag apply -r rules.toml -s subjects.json --json
//!
//! # List functions and keywords
//! autotag functions
//!
//! # Debug logging (RUST_LOG overrides)
//! autotag -vv apply -r rules.toml -s subjects.json
//! ```

use autotag::{
    AutotagError,
    batch::{self, Report},
    cli::{Cli, Commands},
    config::{EngineConfig, RuleSet},
    constraint::{Compiler, Function, Keyword},
    output,
    subject::{MemoryTagStore, TagId, TagInfo},
};
use colored::Colorize;
use std::fs;
use std::path::{Path, PathBuf};

type Result<T> = std::result::Result<T, AutotagError>;

fn handle_check_command(expr: &str, tags: &[String], quiet: bool) -> Result<()> {
    let store = MemoryTagStore::new();
    for (i, name) in tags.iter().enumerate() {
        store.insert_tag(TagInfo::new(TagId(i as u32 + 1), name.clone()));
    }

    let compiler = if tags.is_empty() {
        Compiler::new()
    } else {
        Compiler::new().with_tags(&store)
    };

    match compiler.compile(expr) {
        Ok(compiled) => {
            println!("{}", output::compiled(&compiled, quiet));
            Ok(())
        }
        Err(e) => {
            if !quiet {
                eprintln!("{}", output::compile_error(&e));
            }
            Err(e.into())
        }
    }
}

fn handle_apply_command(
    rules: &Path,
    subjects: &Path,
    config: Option<&Path>,
    json: bool,
    quiet: bool,
) -> Result<()> {
    let config = load_config(config)?;
    let rules = RuleSet::load(rules)?;
    let records = batch::parse_subjects(&fs::read_to_string(subjects)?)?;

    let report = batch::apply_rules(&rules, records, config)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report, quiet);
    }
    Ok(())
}

fn print_report(report: &Report, quiet: bool) {
    if !quiet {
        println!("Subjects ({}):", report.subjects.len());
    }
    for subject in &report.subjects {
        println!("{}", output::subject_with_tags(&subject.name, &subject.tags, quiet));
    }

    if !report.diagnostics.is_empty() && !quiet {
        println!("\n{}", "Constraint diagnostics:".yellow());
        for diagnostic in &report.diagnostics {
            println!("{}", output::diagnostic(&diagnostic.tag, &diagnostic.message));
        }
    }
}

fn handle_functions_command(quiet: bool) {
    if !quiet {
        println!("Functions:");
    }
    for (function, names) in Function::all() {
        let detail = format!("{:?}", function.signature()).to_lowercase();
        println!("{}", output::names(function.name(), &names[1..], &detail));
    }

    if !quiet {
        println!("\nKeywords:");
    }
    for (keyword, names) in Keyword::all() {
        let detail = keyword.dependency().to_string();
        println!("{}", output::names(keyword.name(), &names[1..], &detail));
    }
}

fn handle_config_command(config: Option<&Path>, write: Option<PathBuf>, quiet: bool) -> Result<()> {
    let config = load_config(config)?;
    if let Some(path) = write {
        config.save(&path)?;
        if !quiet {
            println!("Settings written to {}", path.display());
        }
    } else {
        print!("{}", config.to_toml()?);
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    Ok(match path {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    })
}

fn run(cli: Cli) -> Result<()> {
    let quiet = cli.quiet;
    match cli.command {
        Commands::Check { expr, tags } => handle_check_command(&expr, &tags, quiet),
        Commands::Apply {
            rules,
            subjects,
            config,
            json,
        } => handle_apply_command(&rules, &subjects, config.as_deref(), json, quiet),
        Commands::Functions => {
            handle_functions_command(quiet);
            Ok(())
        }
        Commands::Config { config, write } => {
            handle_config_command(config.as_deref(), write, quiet)
        }
    }
}

fn main() {
    let cli = Cli::parse_args();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level().into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let is_check = matches!(cli.command, Commands::Check { .. });
    if let Err(e) = run(cli) {
        if !is_check {
            eprintln!("{} {e}", "error:".red());
        }
        std::process::exit(1);
    }
}
