//! # `reclass` CLI
//!
//! Thin driver over [`reclass_rs::core::Core`]: parses flags, assembles a
//! [`Storage`] backend and [`Settings`] from [`Config::load`] plus CLI
//! overrides, runs `--nodeinfo`/`--inventory`, and writes the rendered
//! document to stdout. Exit codes follow `reclass_rs::error::exit_code`'s
//! POSIX convention.

use clap::Parser;
use reclass_rs::core::Core;
use reclass_rs::error::exit_code;
use reclass_rs::output::{self, OutputFormat};
use reclass_rs::settings::Settings;
use reclass_rs::storage::{CachedStorage, FilesystemStorage, GitStorage, Storage};
use reclass_rs::Config;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "reclass", about = "Hierarchical configuration inventory engine", version)]
struct Cli {
    /// Print the fully resolved document for a single node.
    #[arg(long, value_name = "NODE")]
    nodeinfo: Option<String>,

    /// Print the fully resolved document for every node.
    #[arg(long)]
    inventory: bool,

    /// Root directory holding both `nodes/` and `classes/` (filesystem
    /// backend shorthand for `--nodes-uri`/`--classes-uri`).
    #[arg(long, value_name = "URI", env = "RECLASS_INVENTORY_BASE_URI")]
    inventory_base_uri: Option<PathBuf>,

    #[arg(long, value_name = "URI", env = "RECLASS_NODES_URI")]
    nodes_uri: Option<PathBuf>,

    #[arg(long, value_name = "URI", env = "RECLASS_CLASSES_URI")]
    classes_uri: Option<PathBuf>,

    #[arg(long, value_name = "ENV", env = "RECLASS_ENVIRONMENT")]
    environment: Option<String>,

    /// Explicit config file, bypassing the normal search order.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "tree")]
    output: OutputKind,

    #[arg(long, overrides_with = "no_pretty_print")]
    pretty_print: bool,

    #[arg(long, overrides_with = "pretty_print")]
    no_pretty_print: bool,

    /// Drop the `__reclass__` metadata block from the printed document.
    #[arg(long)]
    no_refs: bool,

    /// Tolerate missing classes; an optional regex restricts which
    /// class names are tolerated.
    #[arg(long, value_name = "REGEX", num_args = 0..=1, default_missing_value = "")]
    ignore_class_notfound: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum OutputKind {
    Tree,
    Json,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.nodeinfo.is_some() && cli.inventory {
        let err = reclass_rs::error::ConfigError::InvalidOptionCombination(
            "--nodeinfo and --inventory are mutually exclusive".to_string(),
        );
        eprintln!("reclass: {err}");
        return ExitCode::from(exit_code::CONFIG as u8);
    }

    let config = match cli.config.as_deref() {
        Some(path) => Config::from_file(path),
        None => Config::load_with_inventory_base(cli.inventory_base_uri.as_deref()),
    };
    let config = match config {
        Ok(c) => c,
        Err(e) => {
            eprintln!("reclass: configuration error: {e}");
            return ExitCode::from(exit_code::CONFIG as u8);
        }
    };

    init_logging(&config.logging.level);

    let mut settings = config.apply_settings(Settings::default());
    if let Some(environment) = &cli.environment {
        settings.default_environment = environment.clone();
    }
    if let Some(pattern) = &cli.ignore_class_notfound {
        settings.ignore_class_notfound = true;
        if !pattern.is_empty() {
            settings.ignore_class_notfound_regexp.push(pattern.clone());
        }
    }

    let nodes_uri = cli
        .nodes_uri
        .or_else(|| cli.inventory_base_uri.as_ref().map(|base| base.join("nodes")))
        .unwrap_or_else(|| config.storage.nodes_uri.clone());
    let classes_uri = cli
        .classes_uri
        .or_else(|| cli.inventory_base_uri.as_ref().map(|base| base.join("classes")))
        .unwrap_or_else(|| config.storage.classes_uri.clone());

    if let Err(e) = reclass_rs::config::validate_storage_uris(&nodes_uri, &classes_uri) {
        eprintln!("reclass: {e}");
        return ExitCode::from(exit_code::CONFIG as u8);
    }

    let storage = match build_storage(&config, &nodes_uri, &classes_uri, &settings) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("reclass: {e}");
            return ExitCode::from(e.exit_code() as u8);
        }
    };

    let environment = settings.default_environment.clone();
    let core = Core::new(storage.as_ref(), &settings);
    // `--no-refs` only strips the `__reclass__` metadata block below (see
    // `output::strip_meta`); it never hides data the document actually
    // carries, so `exports` is always included.
    let include_exports = true;
    let format = match cli.output {
        OutputKind::Tree => OutputFormat::Yaml,
        OutputKind::Json => OutputFormat::Json,
    };

    let document = if let Some(nodename) = cli.nodeinfo.as_deref() {
        match core.nodeinfo(&environment, nodename) {
            Ok(entity) => output::nodeinfo_document(&entity, include_exports),
            Err(e) => {
                eprintln!("reclass: {}", e.to_string());
                return ExitCode::from(e.exit_code() as u8);
            }
        }
    } else if cli.inventory {
        match core.inventory(&environment) {
            Ok(nodes) => output::inventory_document(&nodes, include_exports),
            Err(e) => {
                eprintln!("reclass: {e}");
                return ExitCode::from(e.exit_code() as u8);
            }
        }
    } else {
        eprintln!("reclass: one of --nodeinfo NODE or --inventory is required");
        return ExitCode::from(exit_code::USAGE as u8);
    };

    let document = if cli.no_refs { output::strip_meta(document) } else { document };
    let compact = cli.no_pretty_print && !cli.pretty_print;

    let rendered = if compact && format == OutputFormat::Json {
        serde_json::to_string(&document.to_json()).map_err(|e| e.to_string())
    } else {
        output::render(&document, format)
    };

    match rendered {
        Ok(rendered) => {
            println!("{rendered}");
            ExitCode::from(exit_code::OK as u8)
        }
        Err(e) => {
            eprintln!("reclass: failed to render output: {e}");
            ExitCode::from(exit_code::DATA as u8)
        }
    }
}

fn build_storage(
    config: &Config,
    nodes_uri: &PathBuf,
    classes_uri: &PathBuf,
    settings: &Settings,
) -> Result<Box<dyn Storage>, reclass_rs::error::ReclassError> {
    use reclass_rs::config::StorageBackend;
    match config.storage.backend {
        StorageBackend::Filesystem => Ok(Box::new(CachedStorage::new(FilesystemStorage::new(
            nodes_uri.clone(),
            classes_uri.clone(),
            settings.default_environment.clone(),
            settings.compose_node_name,
        )))),
        StorageBackend::Git => {
            let repo_root = nodes_uri
                .parent()
                .map(std::path::Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            let storage = GitStorage::open(
                repo_root,
                nodes_uri.clone(),
                classes_uri.clone(),
                settings.compose_node_name,
            )?;
            Ok(Box::new(CachedStorage::new(storage)))
        }
    }
}

fn init_logging(level: &str) {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
