//! Bounded-concurrency task execution
//!
//! A fixed set of workers drains a bounded queue; results stream back in
//! completion order, one result per submitted task. Cancellation is
//! cooperative: every task receives the pool's token and is expected to
//! check it between I/O steps, stopping before any atomic commit.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{ErrorKind, SyncError};
use crate::logging::*;

/// A unit of work executed by the pool
#[async_trait]
pub trait Task: Send + Sync {
	async fn run(&self, cancel: CancellationToken) -> Result<(), SyncError>;

	fn id(&self) -> String;

	/// Higher runs earlier when the queue backs up; informational for now
	fn priority(&self) -> i32 {
		0
	}
}

type TaskFuture = Pin<Box<dyn Future<Output = Result<(), SyncError>> + Send>>;

/// Task built from a closure, for one-off work
pub struct FnTask {
	id: String,
	priority: i32,
	operation: Box<dyn Fn(CancellationToken) -> TaskFuture + Send + Sync>,
}

impl FnTask {
	pub fn new<F>(id: impl Into<String>, priority: i32, operation: F) -> FnTask
	where
		F: Fn(CancellationToken) -> TaskFuture + Send + Sync + 'static,
	{
		FnTask { id: id.into(), priority, operation: Box::new(operation) }
	}
}

#[async_trait]
impl Task for FnTask {
	async fn run(&self, cancel: CancellationToken) -> Result<(), SyncError> {
		(self.operation)(cancel).await
	}

	fn id(&self) -> String {
		self.id.clone()
	}

	fn priority(&self) -> i32 {
		self.priority
	}
}

/// Outcome of one task execution
#[derive(Debug)]
pub struct TaskResult {
	pub task_id: String,
	pub error: Option<SyncError>,
	pub started_at: DateTime<Utc>,
	pub finished_at: DateTime<Utc>,
	pub duration: Duration,
}

impl TaskResult {
	pub fn is_ok(&self) -> bool {
		self.error.is_none()
	}
}

/// Counters kept under one lock
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
	pub submitted: u64,
	pub completed: u64,
	pub failed: u64,
	pub total_duration: Duration,
	pub average_duration: Duration,
	pub active: usize,
	pub idle: usize,
}

/// Why a submission was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
	/// The bounded queue is at capacity
	QueueFull,

	/// The pool has been stopped
	ShuttingDown,
}

impl fmt::Display for SubmitError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SubmitError::QueueFull => write!(f, "task queue is full"),
			SubmitError::ShuttingDown => write!(f, "worker pool is shutting down"),
		}
	}
}

impl std::error::Error for SubmitError {}

/// Fixed-size worker pool over a bounded task queue
pub struct WorkerPool {
	task_tx: Option<mpsc::Sender<Box<dyn Task>>>,
	result_rx: Option<mpsc::Receiver<TaskResult>>,
	cancel: CancellationToken,
	handles: Vec<JoinHandle<()>>,
	stats: Arc<Mutex<PoolStats>>,
	workers: usize,
}

impl WorkerPool {
	/// `workers == 0` uses the host CPU count; `queue_capacity == 0` uses
	/// twice the worker count.
	pub fn new(workers: usize, queue_capacity: usize) -> WorkerPool {
		let workers = if workers == 0 {
			std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
		} else {
			workers
		};
		let queue_capacity = if queue_capacity == 0 { workers * 2 } else { queue_capacity };

		let (task_tx, task_rx) = mpsc::channel::<Box<dyn Task>>(queue_capacity);
		// Results never block completed workers for long: room for every
		// queued task plus every in-flight one.
		let (result_tx, result_rx) = mpsc::channel::<TaskResult>(queue_capacity + workers);

		let cancel = CancellationToken::new();
		let stats = Arc::new(Mutex::new(PoolStats { idle: workers, ..Default::default() }));
		let shared_rx = Arc::new(tokio::sync::Mutex::new(task_rx));

		let mut handles = Vec::with_capacity(workers);
		for worker_id in 0..workers {
			let rx = Arc::clone(&shared_rx);
			let tx = result_tx.clone();
			let stats = Arc::clone(&stats);
			let cancel = cancel.clone();
			handles.push(tokio::spawn(worker_loop(worker_id, rx, tx, stats, cancel)));
		}

		WorkerPool {
			task_tx: Some(task_tx),
			result_rx: Some(result_rx),
			cancel,
			handles,
			stats,
			workers,
		}
	}

	pub fn worker_count(&self) -> usize {
		self.workers
	}

	pub fn cancellation_token(&self) -> CancellationToken {
		self.cancel.clone()
	}

	/// Non-blocking submit
	pub fn submit(&self, task: Box<dyn Task>) -> Result<(), SubmitError> {
		let Some(tx) = &self.task_tx else {
			return Err(SubmitError::ShuttingDown);
		};
		match tx.try_send(task) {
			Ok(()) => {
				self.stats.lock().expect("pool stats lock poisoned").submitted += 1;
				Ok(())
			}
			Err(mpsc::error::TrySendError::Full(_)) => Err(SubmitError::QueueFull),
			Err(mpsc::error::TrySendError::Closed(_)) => Err(SubmitError::ShuttingDown),
		}
	}

	/// The consumer side of the result stream. Results arrive in
	/// completion order; the stream closes once the pool stops.
	pub fn take_results(&mut self) -> Option<mpsc::Receiver<TaskResult>> {
		self.result_rx.take()
	}

	/// Close submission, signal cancellation, drain running tasks.
	/// After this returns no further result is produced.
	pub async fn stop(&mut self) {
		self.task_tx = None;
		self.cancel.cancel();
		for handle in self.handles.drain(..) {
			let _ = handle.await;
		}
	}

	pub fn stats(&self) -> PoolStats {
		self.stats.lock().expect("pool stats lock poisoned").clone()
	}
}

async fn worker_loop(
	worker_id: usize,
	rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Box<dyn Task>>>>,
	tx: mpsc::Sender<TaskResult>,
	stats: Arc<Mutex<PoolStats>>,
	cancel: CancellationToken,
) {
	loop {
		let task = {
			let mut rx = rx.lock().await;
			rx.recv().await
		};
		let Some(task) = task else {
			trace_exit(worker_id);
			return;
		};

		{
			let mut stats = stats.lock().expect("pool stats lock poisoned");
			stats.active += 1;
			stats.idle = stats.idle.saturating_sub(1);
		}

		let started_at = Utc::now();
		let clock = Instant::now();
		let error = task.run(cancel.clone()).await.err();
		let duration = clock.elapsed();

		{
			let mut stats = stats.lock().expect("pool stats lock poisoned");
			stats.active -= 1;
			stats.idle += 1;
			stats.completed += 1;
			if error.is_some() {
				stats.failed += 1;
			}
			stats.total_duration += duration;
			stats.average_duration = stats.total_duration / stats.completed as u32;
		}

		let result = TaskResult {
			task_id: task.id(),
			error,
			started_at,
			finished_at: Utc::now(),
			duration,
		};
		if tx.send(result).await.is_err() {
			// Consumer is gone; keep draining so every queued task still runs
			debug!("worker {} dropping result, consumer closed", worker_id);
		}
	}
}

fn trace_exit(worker_id: usize) {
	debug!("worker {} exiting, queue closed", worker_id);
}

/// Outcome of a [`BatchExecutor`] run
#[derive(Debug)]
pub struct BatchResult {
	/// One entry per completed task, completion order
	pub results: Vec<TaskResult>,

	/// Ids of tasks that had not completed when the deadline hit
	pub timed_out: Vec<String>,
}

impl BatchResult {
	pub fn timed_out(&self) -> bool {
		!self.timed_out.is_empty()
	}
}

/// Runs a fixed task set on a private pool and collects exactly one result
/// per task, or stops at a wall-clock deadline.
pub struct BatchExecutor {
	workers: usize,
	timeout: Duration,
}

impl BatchExecutor {
	pub fn new(workers: usize, timeout: Duration) -> BatchExecutor {
		BatchExecutor { workers, timeout }
	}

	pub async fn execute(&self, tasks: Vec<Box<dyn Task>>) -> Result<BatchResult, SyncError> {
		if tasks.is_empty() {
			return Ok(BatchResult { results: Vec::new(), timed_out: Vec::new() });
		}

		let queue = tasks.len().max(self.workers * 2);
		let mut pool = WorkerPool::new(self.workers, queue);
		let mut rx = pool.take_results().expect("fresh pool has a result stream");

		let ids: Vec<String> = tasks.iter().map(|t| t.id()).collect();
		for task in tasks {
			pool.submit(task).map_err(|e| {
				SyncError::new(ErrorKind::Internal, "batch").with_message(e.to_string())
			})?;
		}

		let deadline = Instant::now() + self.timeout;
		let mut results = Vec::with_capacity(ids.len());
		for _ in 0..ids.len() {
			let remaining = deadline.saturating_duration_since(Instant::now());
			match tokio::time::timeout(remaining, rx.recv()).await {
				Ok(Some(result)) => results.push(result),
				Ok(None) => break,
				Err(_) => {
					warn!("batch timed out after {:?}", self.timeout);
					pool.stop().await;
					let timed_out = missing_ids(&ids, &results);
					return Ok(BatchResult { results, timed_out });
				}
			}
		}

		pool.stop().await;
		let timed_out = missing_ids(&ids, &results);
		Ok(BatchResult { results, timed_out })
	}
}

fn missing_ids(ids: &[String], results: &[TaskResult]) -> Vec<String> {
	ids.iter().filter(|id| !results.iter().any(|r| r.task_id == **id)).cloned().collect()
}

/// Tracks batch progress and notifies registered callbacks
pub struct ProgressTracker {
	total: usize,
	state: Mutex<(usize, usize)>,
	callbacks: Mutex<Vec<Box<dyn Fn(usize, usize, usize) + Send + Sync>>>,
}

impl ProgressTracker {
	pub fn new(total: usize) -> ProgressTracker {
		ProgressTracker { total, state: Mutex::new((0, 0)), callbacks: Mutex::new(Vec::new()) }
	}

	/// Register a `(completed, total, failed)` callback
	pub fn on_progress<F>(&self, callback: F)
	where
		F: Fn(usize, usize, usize) + Send + Sync + 'static,
	{
		self.callbacks.lock().expect("progress lock poisoned").push(Box::new(callback));
	}

	pub fn update(&self, success: bool) {
		let (completed, failed) = {
			let mut state = self.state.lock().expect("progress lock poisoned");
			state.0 += 1;
			if !success {
				state.1 += 1;
			}
			*state
		};
		for callback in self.callbacks.lock().expect("progress lock poisoned").iter() {
			callback(completed, self.total, failed);
		}
	}

	/// `(completed, total, failed)`
	pub fn progress(&self) -> (usize, usize, usize) {
		let (completed, failed) = *self.state.lock().expect("progress lock poisoned");
		(completed, self.total, failed)
	}

	pub fn is_complete(&self) -> bool {
		self.progress().0 >= self.total
	}
}


// vim: ts=4
