use clap::{Arg, ArgAction, ArgMatches, Command};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use syncstation::config::{self, LocalConfig};
use syncstation::error::{ErrorKind, SyncError};
use syncstation::hooks::GitStagingHooks;
use syncstation::metadata::RemoveMode;
use syncstation::sync::{init_workspace, SyncEngine};
use syncstation::types::{ItemKind, SyncOperation, SyncResult};
use syncstation::validation;

fn build_cli() -> Command {
	Command::new("syncstation")
		.version(env!("CARGO_PKG_VERSION"))
		.about("Sync configuration files across computers through a shared cloud directory")
		.subcommand_required(true)
		.subcommand(
			Command::new("init")
				.about("Set up this computer and seed the shared documents")
				.arg(Arg::new("cloud-dir").help("Rendezvous directory (defaults to the current directory)"))
				.arg(Arg::new("git").long("git").action(ArgAction::SetTrue).help("Store shared metadata in git notes"))
				.arg(Arg::new("name").long("name").help("Computer id (defaults to the hostname)")),
		)
		.subcommand(
			Command::new("add")
				.about("Register a file or directory for synchronization")
				.arg(Arg::new("name").required(true))
				.arg(Arg::new("path").required(true))
				.arg(Arg::new("exclude").long("exclude").help("Comma-separated glob patterns to skip")),
		)
		.subcommand(
			Command::new("sync")
				.about("Bidirectional sync driven by content hashes")
				.arg(Arg::new("name")),
		)
		.subcommand(
			Command::new("push")
				.about("Mirror local items to the cloud")
				.arg(Arg::new("name"))
				.arg(Arg::new("force").long("force").action(ArgAction::SetTrue).help("Proceed despite conflicts")),
		)
		.subcommand(
			Command::new("pull")
				.about("Mirror cloud items to this computer")
				.arg(Arg::new("name"))
				.arg(Arg::new("force").long("force").action(ArgAction::SetTrue).help("Proceed despite conflicts")),
		)
		.subcommand(Command::new("status").about("Show per-item sync status").arg(Arg::new("name")))
		.subcommand(Command::new("list").about("List configured sync items"))
		.subcommand(Command::new("config").about("Show the local configuration"))
		.subcommand(
			Command::new("remove")
				.about("Remove a sync item")
				.arg(Arg::new("name").required(true))
				.arg(Arg::new("global").long("global").action(ArgAction::SetTrue).help("Remove from every computer, keep cloud files"))
				.arg(Arg::new("delete-cloud").long("delete-cloud").action(ArgAction::SetTrue).help("Remove everywhere and delete cloud files")),
		)
}

#[tokio::main]
async fn main() -> ExitCode {
	syncstation::logging::init_tracing();
	let matches = build_cli().get_matches();

	match run(matches).await {
		Ok(code) => code,
		Err(e) => {
			eprintln!("error: {}", e);
			match e.kind {
				ErrorKind::Internal => ExitCode::from(2),
				_ => ExitCode::from(1),
			}
		}
	}
}

async fn run(matches: ArgMatches) -> Result<ExitCode, SyncError> {
	let state_dir = config::config_dir();
	let config_path = state_dir.join(config::CONFIG_FILE);

	match matches.subcommand() {
		Some(("init", sub)) => {
			let cloud_dir = sub
				.get_one::<String>("cloud-dir")
				.map(PathBuf::from)
				.unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
			let computer = sub
				.get_one::<String>("name")
				.cloned()
				.unwrap_or_else(config::default_computer_id);
			let git_mode = sub.get_flag("git");

			let existing = LocalConfig::load(&config_path).await?;
			if existing.is_initialized() {
				println!(
					"already initialized with cloud directory {}",
					existing.cloud_sync_dir.display()
				);
				return Ok(ExitCode::SUCCESS);
			}

			let config =
				init_workspace(&cloud_dir, &computer, git_mode, &state_dir, &config_path).await?;
			println!("initialized as '{}' at {}", computer, config.cloud_sync_dir.display());
			Ok(ExitCode::SUCCESS)
		}
		Some(("add", sub)) => {
			let config = load_initialized(&config_path).await?;
			let name = validation::sanitize(
				sub.get_one::<String>("name").expect("required"),
				&validation::SanitizerOptions::default(),
			);
			let path = validation::sanitize(
				sub.get_one::<String>("path").expect("required"),
				&validation::SanitizerOptions { max_length: 4096, ..Default::default() },
			);
			let exclude_patterns: Vec<String> = sub
				.get_one::<String>("exclude")
				.map(|list| list.split(',').map(|p| p.trim().to_string()).collect())
				.unwrap_or_default();

			// Type is detected from what the path points at right now
			let expanded = syncstation::paths::expand_path(&path);
			let kind = match std::fs::metadata(&expanded) {
				Ok(metadata) if metadata.is_dir() => ItemKind::Folder,
				Ok(_) => ItemKind::File,
				Err(e) => return Err(SyncError::from_io("add", &expanded, e).with_item(&name)),
			};

			let mut paths = BTreeMap::new();
			paths.insert(config.current_computer.clone(), path);
			let item = syncstation::SyncItem { name: name.clone(), kind, paths, exclude_patterns };

			let engine = make_engine(config, &state_dir, &config_path);
			engine.store().add_item(item).await?;
			println!("added {} '{}'", kind, name);
			Ok(ExitCode::SUCCESS)
		}
		Some(("sync", sub)) => {
			let config = load_initialized(&config_path).await?;
			let engine = make_engine(config, &state_dir, &config_path);
			let result =
				engine.sync(SyncOperation::Smart, name_arg(sub), false).await?;
			finish(result)
		}
		Some(("push", sub)) => {
			let config = load_initialized(&config_path).await?;
			let engine = make_engine(config, &state_dir, &config_path);
			let result = engine
				.sync(SyncOperation::Push, name_arg(sub), sub.get_flag("force"))
				.await?;
			finish(result)
		}
		Some(("pull", sub)) => {
			let config = load_initialized(&config_path).await?;
			let engine = make_engine(config, &state_dir, &config_path);
			let result = engine
				.sync(SyncOperation::Pull, name_arg(sub), sub.get_flag("force"))
				.await?;
			finish(result)
		}
		Some(("status", sub)) => {
			let config = load_initialized(&config_path).await?;
			let engine = make_engine(config, &state_dir, &config_path);
			for report in engine.status(name_arg(sub)).await? {
				let local = report
					.local_path
					.map(|p| p.display().to_string())
					.unwrap_or_else(|| "(no path on this computer)".to_string());
				println!("{:<24} {:<8} {:<12} {}", report.name, report.kind, report.status, local);
			}
			Ok(ExitCode::SUCCESS)
		}
		Some(("list", _)) => {
			let config = load_initialized(&config_path).await?;
			let engine = make_engine(config.clone(), &state_dir, &config_path);
			let items = engine.store().load_items().await?;
			if items.sync_items.is_empty() {
				println!("no sync items configured");
			}
			for item in &items.sync_items {
				let here = item
					.paths
					.get(&config.current_computer)
					.map(String::as_str)
					.unwrap_or("(no path on this computer)");
				println!("{:<24} {:<8} {}", item.name, item.kind, here);
				for (computer, path) in &item.paths {
					if computer != &config.current_computer {
						println!("{:<24} {:<8} {} ({})", "", "", path, computer);
					}
				}
			}
			Ok(ExitCode::SUCCESS)
		}
		Some(("config", _)) => {
			let config = LocalConfig::load(&config_path).await?;
			if !config.is_initialized() {
				println!("not initialized; run 'syncstation init' first");
				return Ok(ExitCode::from(1));
			}
			println!("config file:     {}", config_path.display());
			println!("cloud directory: {}", config.cloud_sync_dir.display());
			println!("computer id:     {}", config.current_computer);
			println!("git mode:        {}", config.git_mode);
			if let Some(root) = &config.git_repo_root {
				println!("git repo root:   {}", root.display());
			}
			Ok(ExitCode::SUCCESS)
		}
		Some(("remove", sub)) => {
			let config = load_initialized(&config_path).await?;
			let name = sub.get_one::<String>("name").expect("required");
			let mode = match (sub.get_flag("global"), sub.get_flag("delete-cloud")) {
				(true, true) => {
					return Err(SyncError::new(ErrorKind::Validation, "remove")
						.with_message("--global and --delete-cloud are mutually exclusive"));
				}
				(false, true) => RemoveMode::DeleteCloud,
				(true, false) => RemoveMode::Global,
				(false, false) => RemoveMode::LocalOnly,
			};

			let computer = config.current_computer.clone();
			let engine = make_engine(config, &state_dir, &config_path);
			engine.store().remove_item(name, &computer, mode).await?;
			match mode {
				RemoveMode::LocalOnly => {
					println!("removed this computer's path for '{}'", name)
				}
				RemoveMode::Global => {
					println!("removed '{}' from the registry (cloud files preserved)", name)
				}
				RemoveMode::DeleteCloud => {
					println!("removed '{}' and deleted its cloud files", name)
				}
			}
			Ok(ExitCode::SUCCESS)
		}
		_ => unreachable!("subcommand required"),
	}
}

fn make_engine(config: LocalConfig, state_dir: &std::path::Path, config_path: &std::path::Path) -> SyncEngine {
	let git_root = if config.git_mode { config.git_repo_root.clone() } else { None };
	let mut engine = SyncEngine::new(config, state_dir).with_config_path(config_path);
	if let Some(root) = git_root {
		engine = engine.with_hooks(Arc::new(GitStagingHooks::new(root)));
	}
	engine
}

async fn load_initialized(config_path: &std::path::Path) -> Result<LocalConfig, SyncError> {
	let config = LocalConfig::load(config_path).await?;
	if !config.is_initialized() {
		return Err(SyncError::new(ErrorKind::ConfigLoad, "load-config")
			.with_message("not initialized; run 'syncstation init' first"));
	}
	validation::validate_computer_id(&config.current_computer)?;
	Ok(config)
}

fn name_arg(matches: &ArgMatches) -> Option<&str> {
	matches.get_one::<String>("name").map(String::as_str)
}

fn finish(result: SyncResult) -> Result<ExitCode, SyncError> {
	for err in &result.errors {
		eprintln!("  {}", err);
	}
	println!("{}", result.message);
	if !result.timed_out.is_empty() {
		for id in &result.timed_out {
			eprintln!("  timed out: {}", id);
		}
		return Ok(ExitCode::from(3));
	}
	if result.success {
		Ok(ExitCode::SUCCESS)
	} else {
		Ok(ExitCode::from(1))
	}
}

// vim: ts=4
