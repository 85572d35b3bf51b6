//! Sync orchestration
//!
//! One invocation: load the registry, select items, gate explicit push/pull
//! on a conflict preview, then run one task per item on the worker pool and
//! fold the outcomes into a single [`SyncResult`]. The orchestrator itself
//! stays single-threaded; all concurrency lives in the pool, and at most
//! one task is ever in flight per item, which serializes every per-file
//! metadata write through the task that performed the transfer.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::atomic;
use crate::backup::BackupManager;
use crate::cache::HashCache;
use crate::config::LocalConfig;
use crate::engine::{ConflictReason, Decision, DecisionEngine};
use crate::error::{ErrorKind, SyncError};
use crate::hooks::{NoHooks, SyncHooks};
use crate::logging::*;
use crate::metadata::{MetadataStore, SyncItem};
use crate::mover::{FileMover, MoveOutcome};
use crate::pool::{BatchExecutor, ProgressTracker, Task};
use crate::probe::Presence;
use crate::types::{ItemKind, SyncOperation, SyncResult, SyncStatus};
use crate::validation::ExcludeSet;

const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_secs(600);
const HASH_CACHE_FILE: &str = "hash-cache.json";

/// Lifecycle of one item's task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
	New,
	Decided,
	Running,
	/// Terminal; `recoverable` distinguishes conflicts from hard failures
	Done { ok: bool, recoverable: bool },
}

/// Per-item result recorded by the task that processed it
#[derive(Debug)]
pub struct ItemOutcome {
	pub item: String,
	pub changed: usize,
	pub skipped: usize,
	pub warnings: Vec<String>,
	pub state: TaskState,
}

/// Per-item status line for read-only inspection
#[derive(Debug)]
pub struct ItemStatus {
	pub name: String,
	pub kind: ItemKind,
	pub local_path: Option<PathBuf>,
	pub cloud_path: PathBuf,
	pub status: SyncStatus,
}

/// The sync engine: wires cache, store, mover and pool together
pub struct SyncEngine {
	store: Arc<MetadataStore>,
	cache: Arc<HashCache>,
	hooks: Arc<dyn SyncHooks>,
	backups: Arc<BackupManager>,
	state_dir: PathBuf,
	config_path: Option<PathBuf>,
	workers: usize,
	timeout: Duration,
}

impl SyncEngine {
	/// `state_dir` holds the local-only documents (file states, hash
	/// cache, backups).
	pub fn new(config: LocalConfig, state_dir: &Path) -> SyncEngine {
		let cache = Arc::new(HashCache::new(Duration::from_secs(3600)));
		cache.load_from_file(&state_dir.join(HASH_CACHE_FILE));
		let backups = Arc::new(BackupManager::new(
			state_dir.join("backups"),
			config.current_computer.clone(),
		));
		SyncEngine {
			store: Arc::new(MetadataStore::new(config, state_dir)),
			cache,
			hooks: Arc::new(NoHooks),
			backups,
			state_dir: state_dir.to_path_buf(),
			config_path: None,
			workers: 0,
			timeout: DEFAULT_BATCH_TIMEOUT,
		}
	}

	pub fn with_hooks(mut self, hooks: Arc<dyn SyncHooks>) -> Self {
		self.hooks = hooks;
		self
	}

	pub fn with_workers(mut self, workers: usize) -> Self {
		self.workers = workers;
		self
	}

	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = timeout;
		self
	}

	/// Persist `last_sync_times` updates to this config file after runs
	pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
		self.config_path = Some(path.into());
		self
	}

	pub fn store(&self) -> &Arc<MetadataStore> {
		&self.store
	}

	pub fn cache(&self) -> &Arc<HashCache> {
		&self.cache
	}

	pub fn backups(&self) -> &Arc<BackupManager> {
		&self.backups
	}

	fn config(&self) -> &LocalConfig {
		self.store.config()
	}

	/// Run one sync invocation over all items, or the one named.
	pub async fn sync(
		&self,
		operation: SyncOperation,
		name: Option<&str>,
		force: bool,
	) -> Result<SyncResult, SyncError> {
		let config = self.config();
		if !config.is_initialized() {
			return Err(SyncError::new(ErrorKind::ConfigLoad, "sync")
				.with_message("not initialized; run 'init' first"));
		}

		let items = self.select_items(name).await?;
		let mut result = SyncResult::new(operation);
		if items.is_empty() {
			result.message = "no sync items configured".to_string();
			return Ok(result);
		}

		// Conflict preview gates explicit one-way operations
		if operation != SyncOperation::Smart && !force {
			let conflicts = self.preview_conflicts(&items).await;
			if !conflicts.is_empty() {
				for err in conflicts {
					result.record_error(err);
				}
				result.message = format!(
					"{} refused: {} item(s) in conflict (use --force to override)",
					operation, result.errored
				);
				return Ok(result);
			}
		}

		// Writers that died mid-commit may have left temp files behind
		atomic::clean_stale_temps(&config.cloud_configs_path());

		let ctx = Arc::new(TaskContext {
			store: Arc::clone(&self.store),
			decider: DecisionEngine::new(Arc::clone(&self.cache)),
			mover: FileMover::new(Arc::clone(&self.cache), Arc::clone(&self.hooks))
				.with_backups(Arc::clone(&self.backups)),
			computer: config.current_computer.clone(),
			configs_root: config.cloud_configs_path(),
			outcomes: Mutex::new(Vec::new()),
			progress: ProgressTracker::new(items.len()),
		});

		let tasks: Vec<Box<dyn Task>> = items
			.iter()
			.map(|item| {
				Box::new(ItemSyncTask {
					item: item.clone(),
					operation,
					ctx: Arc::clone(&ctx),
				}) as Box<dyn Task>
			})
			.collect();

		let executor = BatchExecutor::new(self.workers, self.timeout);
		let batch = executor.execute(tasks).await?;

		for task_result in batch.results {
			if let Some(err) = task_result.error {
				result.record_error(err);
			}
		}
		result.timed_out = batch.timed_out;

		let outcomes = {
			let mut outcomes = ctx.outcomes.lock().expect("outcome lock poisoned");
			std::mem::take(&mut *outcomes)
		};
		let mut synced_items = Vec::new();
		for outcome in &outcomes {
			result.changed += outcome.changed;
			result.skipped += outcome.skipped;
			for warning in &outcome.warnings {
				warn!("{}: {}", outcome.item, warning);
			}
			if matches!(outcome.state, TaskState::Done { ok: true, .. }) {
				synced_items.push(outcome.item.clone());
			}
		}
		result.finalize();

		self.record_sync_times(&synced_items).await;
		if let Err(e) = self.cache.save_to_file(&self.state_dir.join(HASH_CACHE_FILE)) {
			debug!("failed to persist hash cache: {}", e);
		}

		info!("{}", result.message);
		Ok(result)
	}

	/// Read-only status for all items, or the one named
	pub async fn status(&self, name: Option<&str>) -> Result<Vec<ItemStatus>, SyncError> {
		let items = self.select_items(name).await?;
		let config = self.config();
		let decider = DecisionEngine::new(Arc::clone(&self.cache));

		let mut reports = Vec::with_capacity(items.len());
		for item in items {
			let cloud = item.cloud_path(&config.cloud_configs_path());
			let local = item.local_path(&config.current_computer);

			let status = match &local {
				None => SyncStatus::Missing,
				Some(local_path) => match item.kind {
					ItemKind::File => {
						decider.probe().probe_file(local_path, &cloud)?.status()
					}
					ItemKind::Folder => {
						let excludes = ExcludeSet::new(&item.exclude_patterns)
							.map_err(|e| SyncError::from(e).with_item(&item.name))?;
						match decider.decide_tree(local_path, &cloud, &excludes)? {
							Decision::Skip => {
								if Presence::stat(local_path).is_absent() {
									SyncStatus::Missing
								} else {
									SyncStatus::InSync
								}
							}
							Decision::PushLocalToCloud => SyncStatus::LocalNewer,
							Decision::PullCloudToLocal => SyncStatus::CloudNewer,
							Decision::Conflict(_) => SyncStatus::Conflict,
						}
					}
				},
			};

			reports.push(ItemStatus {
				name: item.name.clone(),
				kind: item.kind,
				local_path: local,
				cloud_path: cloud,
				status,
			});
		}
		Ok(reports)
	}

	async fn select_items(&self, name: Option<&str>) -> Result<Vec<SyncItem>, SyncError> {
		let items = self.store.load_items().await?;
		match name {
			None => Ok(items.sync_items),
			Some(name) => match items.find(name) {
				Some(item) => Ok(vec![item.clone()]),
				None => Err(SyncError::new(ErrorKind::FileNotFound, "sync")
					.with_item(name)
					.with_message("no such sync item")),
			},
		}
	}

	/// Decision-engine dry pass over the selected items; collects the
	/// conflicts that would block an explicit push/pull.
	async fn preview_conflicts(&self, items: &[SyncItem]) -> Vec<SyncError> {
		let config = self.config();
		let decider = DecisionEngine::new(Arc::clone(&self.cache));
		let metadata = match self.store.load_metadata().await {
			Ok(metadata) => metadata,
			Err(e) => {
				warn!("conflict preview proceeding without shared metadata: {}", e);
				Default::default()
			}
		};

		let mut conflicts = Vec::new();
		for item in items {
			let Some(local) = item.local_path(&config.current_computer) else {
				continue;
			};
			let cloud = item.cloud_path(&config.cloud_configs_path());

			let decision = match item.kind {
				ItemKind::File => {
					let anchor = metadata
						.get(&item.name, &local.to_string_lossy())
						.and_then(|m| m.last_cloud_hash());
					match decider.decide_file_pair(&local, &cloud, anchor) {
						Ok((decision, probe)) => {
							if let Decision::Conflict(reason) = decision {
								conflicts.push(conflict_error(
									&item.name, reason, &probe, &local, &cloud,
								));
							}
							continue;
						}
						Err(e) => Err(e),
					}
				}
				ItemKind::Folder => ExcludeSet::new(&item.exclude_patterns)
					.map_err(|e| SyncError::from(e).with_item(&item.name))
					.and_then(|excludes| decider.decide_tree(&local, &cloud, &excludes)),
			};

			match decision {
				Ok(Decision::Conflict(reason)) => {
					conflicts.push(
						SyncError::new(ErrorKind::Conflict, "preview")
							.with_item(&item.name)
							.with_path(&local)
							.with_message(reason.to_string()),
					);
				}
				Ok(_) => {}
				Err(e) => {
					// Unreadable items surface during the real run; the
					// gate only cares about provable conflicts
					debug!("conflict preview skipped {}: {}", item.name, e);
				}
			}
		}
		conflicts
	}

	async fn record_sync_times(&self, synced_items: &[String]) {
		let Some(config_path) = &self.config_path else { return };
		if synced_items.is_empty() {
			return;
		}
		let mut config = match LocalConfig::load(config_path).await {
			Ok(config) => config,
			Err(e) => {
				warn!("cannot update last sync times: {}", e);
				return;
			}
		};
		let now = chrono::Utc::now().to_rfc3339();
		for item in synced_items {
			config.last_sync_times.insert(item.clone(), now.clone());
		}
		if let Err(e) = config.save(config_path).await {
			warn!("cannot save last sync times: {}", e);
		}
	}
}

/// Initialize this computer: write the local config and seed the shared
/// documents in the rendezvous directory.
pub async fn init_workspace(
	cloud_dir: &Path,
	computer_id: &str,
	git_mode: bool,
	state_dir: &Path,
	config_path: &Path,
) -> Result<LocalConfig, SyncError> {
	crate::validation::validate_computer_id(computer_id).map_err(SyncError::from)?;

	tokio::fs::create_dir_all(cloud_dir)
		.await
		.map_err(|e| SyncError::from_io("init", cloud_dir, e))?;

	let git_repo_root = if git_mode {
		let output = tokio::process::Command::new("git")
			.args(["rev-parse", "--show-toplevel"])
			.current_dir(cloud_dir)
			.output()
			.await
			.map_err(|e| {
				SyncError::new(ErrorKind::GitOperation, "init")
					.with_path(cloud_dir)
					.with_message(e.to_string())
			})?;
		if !output.status.success() {
			return Err(SyncError::new(ErrorKind::GitOperation, "init")
				.with_path(cloud_dir)
				.with_message("--git requested but the cloud directory is not a git repository"));
		}
		Some(PathBuf::from(String::from_utf8_lossy(&output.stdout).trim()))
	} else {
		None
	};

	let config = LocalConfig {
		cloud_sync_dir: cloud_dir.to_path_buf(),
		current_computer: computer_id.to_string(),
		git_mode,
		git_repo_root,
		..Default::default()
	};
	config.save(config_path).await?;

	let store = MetadataStore::new(config.clone(), state_dir);
	store.seed_shared_documents().await?;
	info!("initialized: rendezvous at {}", cloud_dir.display());
	Ok(config)
}

struct TaskContext {
	store: Arc<MetadataStore>,
	decider: DecisionEngine,
	mover: FileMover,
	computer: String,
	configs_root: PathBuf,
	outcomes: Mutex<Vec<ItemOutcome>>,
	progress: ProgressTracker,
}

struct ItemSyncTask {
	item: SyncItem,
	operation: SyncOperation,
	ctx: Arc<TaskContext>,
}

#[async_trait::async_trait]
impl Task for ItemSyncTask {
	async fn run(&self, cancel: CancellationToken) -> Result<(), SyncError> {
		let mut outcome = ItemOutcome {
			item: self.item.name.clone(),
			changed: 0,
			skipped: 0,
			warnings: Vec::new(),
			state: TaskState::New,
		};

		let run = self.sync_item(&mut outcome, cancel).await;
		let result = match run {
			Ok(()) => {
				outcome.state = TaskState::Done { ok: true, recoverable: true };
				Ok(())
			}
			Err(err) => {
				outcome.state =
					TaskState::Done { ok: false, recoverable: err.is_recoverable() };
				Err(err)
			}
		};

		self.ctx.progress.update(result.is_ok());
		self.ctx.outcomes.lock().expect("outcome lock poisoned").push(outcome);
		result
	}

	fn id(&self) -> String {
		self.item.name.clone()
	}
}

impl ItemSyncTask {
	async fn sync_item(
		&self,
		outcome: &mut ItemOutcome,
		cancel: CancellationToken,
	) -> Result<(), SyncError> {
		let ctx = &self.ctx;
		let item = &self.item;

		let local = item.local_path(&ctx.computer).ok_or_else(|| {
			SyncError::new(ErrorKind::Validation, self.operation.to_string())
				.with_item(&item.name)
				.with_message(format!("no path configured for computer '{}'", ctx.computer))
		})?;
		let cloud = item.cloud_path(&ctx.configs_root);

		match self.operation {
			SyncOperation::Smart => {
				self.smart_sync(outcome, &local, &cloud, cancel).await
			}
			SyncOperation::Push => {
				self.one_way(outcome, &local, &cloud, true, cancel).await
			}
			SyncOperation::Pull => {
				self.one_way(outcome, &local, &cloud, false, cancel).await
			}
		}
	}

	async fn smart_sync(
		&self,
		outcome: &mut ItemOutcome,
		local: &Path,
		cloud: &Path,
		cancel: CancellationToken,
	) -> Result<(), SyncError> {
		let ctx = &self.ctx;
		let item = &self.item;

		match item.kind {
			ItemKind::File => {
				let anchor_doc = match ctx.store.load_metadata().await {
					Ok(metadata) => metadata,
					Err(e) => {
						outcome.warnings.push(format!("shared metadata unavailable: {}", e));
						Default::default()
					}
				};
				let anchor = anchor_doc
					.get(&item.name, &local.to_string_lossy())
					.and_then(|m| m.last_cloud_hash());

				let (decision, probe) =
					ctx.decider.decide_file_pair(local, cloud, anchor)?;
				outcome.state = TaskState::Decided;

				match decision {
					Decision::Skip => {
						if let (Some(hash), Presence::Present { mtime, size, .. }) =
							(&probe.local_hash, &probe.local)
						{
							// Refresh the anchor state so the next
							// decision gets rule 4 for free
							if let Err(e) = ctx
								.store
								.confirm_in_sync(&item.name, local, hash, *mtime, *size)
								.await
							{
								outcome
									.warnings
									.push(format!("state refresh failed: {}", e));
							}
						}
						outcome.skipped = 1;
						Ok(())
					}
					Decision::PushLocalToCloud => {
						outcome.state = TaskState::Running;
						let moved =
							ctx.mover.push_file(item, local, cloud, &ctx.store).await?;
						absorb(outcome, moved);
						Ok(())
					}
					Decision::PullCloudToLocal => {
						outcome.state = TaskState::Running;
						let moved =
							ctx.mover.pull_file(item, local, cloud, &ctx.store).await?;
						absorb(outcome, moved);
						Ok(())
					}
					Decision::Conflict(reason) => {
						Err(conflict_error(&item.name, reason, &probe, local, cloud))
					}
				}
			}
			ItemKind::Folder => {
				let excludes = ExcludeSet::new(&item.exclude_patterns)
					.map_err(|e| SyncError::from(e).with_item(&item.name))?;
				let decision = ctx.decider.decide_tree(local, cloud, &excludes)?;
				outcome.state = TaskState::Decided;

				match decision {
					Decision::Skip => {
						outcome.skipped = 1;
						Ok(())
					}
					Decision::PushLocalToCloud => {
						outcome.state = TaskState::Running;
						let moved =
							ctx.mover.push_tree(item, local, cloud, &cancel).await?;
						absorb(outcome, moved);
						Ok(())
					}
					Decision::PullCloudToLocal => {
						outcome.state = TaskState::Running;
						let moved =
							ctx.mover.pull_tree(item, local, cloud, &cancel).await?;
						absorb(outcome, moved);
						Ok(())
					}
					Decision::Conflict(reason) => {
						Err(SyncError::new(ErrorKind::Conflict, "sync")
							.with_item(&item.name)
							.with_path(local)
							.with_message(reason.to_string()))
					}
				}
			}
		}
	}

	/// Explicit one-way mirror, deletes included
	async fn one_way(
		&self,
		outcome: &mut ItemOutcome,
		local: &Path,
		cloud: &Path,
		push: bool,
		cancel: CancellationToken,
	) -> Result<(), SyncError> {
		let ctx = &self.ctx;
		let item = &self.item;
		let op = if push { "push" } else { "pull" };
		let (src, dst) = if push { (local, cloud) } else { (cloud, local) };

		outcome.state = TaskState::Decided;
		match (Presence::stat(src), Presence::stat(dst)) {
			(Presence::Absent, Presence::Absent) => {
				outcome.skipped = 1;
				Ok(())
			}
			(Presence::Absent, _) => {
				// Mirror the deletion onto the destination side
				outcome.state = TaskState::Running;
				let moved = ctx.mover.mirror_delete(item, dst, local, &ctx.store, op).await?;
				absorb(outcome, moved);
				Ok(())
			}
			(Presence::Inaccessible { why }, _) => {
				Err(SyncError::new(ErrorKind::PermissionDenied, op)
					.with_item(&item.name)
					.with_path(src)
					.with_message(why))
			}
			(Presence::Present { is_dir, .. }, _) => {
				outcome.state = TaskState::Running;
				let moved = if is_dir {
					if push {
						ctx.mover.push_tree(item, local, cloud, &cancel).await?
					} else {
						ctx.mover.pull_tree(item, local, cloud, &cancel).await?
					}
				} else {
					// Skip rewriting identical content
					let probe = ctx.decider.probe().probe_file(local, cloud)?;
					if probe.content_equal == Some(true) {
						outcome.skipped = 1;
						return Ok(());
					}
					if push {
						ctx.mover.push_file(item, local, cloud, &ctx.store).await?
					} else {
						ctx.mover.pull_file(item, local, cloud, &ctx.store).await?
					}
				};
				if moved.files_copied == 0 {
					outcome.skipped += 1;
				}
				absorb(outcome, moved);
				Ok(())
			}
		}
	}
}

fn absorb(outcome: &mut ItemOutcome, moved: MoveOutcome) {
	outcome.changed += moved.files_copied;
	outcome.warnings.extend(moved.warnings);
}

/// Conflict error carrying both sides' hashes and mtimes
fn conflict_error(
	item: &str,
	reason: ConflictReason,
	probe: &crate::probe::FileProbe,
	local: &Path,
	cloud: &Path,
) -> SyncError {
	let side = |hash: &Option<String>, presence: &Presence| {
		format!(
			"{} @ {}",
			hash.as_deref().unwrap_or("absent"),
			presence
				.mtime()
				.map(|t| t.to_rfc3339())
				.unwrap_or_else(|| "unknown".to_string())
		)
	};
	SyncError::new(ErrorKind::Conflict, "sync")
		.with_item(item)
		.with_path(local)
		.with_message(format!(
			"{}; local {} vs cloud {} ({})",
			reason,
			side(&probe.local_hash, &probe.local),
			side(&probe.cloud_hash, &probe.cloud),
			cloud.display()
		))
}


// vim: ts=4
