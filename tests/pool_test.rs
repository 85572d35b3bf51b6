//! Worker pool behavior with real filesystem tasks

use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tempfile::TempDir;

use syncstation::atomic;
use syncstation::error::{ErrorKind, SyncError};
use syncstation::pool::{BatchExecutor, FnTask, Task, WorkerPool};

fn write_task(id: &str, target: PathBuf, content: &'static [u8]) -> Box<dyn Task> {
	Box::new(FnTask::new(id, 0, move |cancel| {
		let target = target.clone();
		Box::pin(async move {
			if cancel.is_cancelled() {
				return Err(SyncError::new(ErrorKind::Internal, "write")
					.with_path(&target)
					.with_message("stopped before commit"));
			}
			atomic::write_file_atomic(&target, content, None)
		})
	}))
}

/// W workers finish N short tasks in roughly N/W rounds, not serially.
#[tokio::test]
async fn test_parallel_liveness() {
	let executor = BatchExecutor::new(4, Duration::from_secs(10));
	let tasks: Vec<Box<dyn Task>> = (0..12)
		.map(|i| {
			Box::new(FnTask::new(format!("t{}", i), 0, |_cancel| {
				Box::pin(async {
					tokio::time::sleep(Duration::from_millis(40)).await;
					Ok(())
				})
			})) as Box<dyn Task>
		})
		.collect();

	let clock = Instant::now();
	let batch = executor.execute(tasks).await.unwrap();
	let elapsed = clock.elapsed();

	assert_eq!(batch.results.len(), 12);
	assert!(batch.results.iter().all(|r| r.is_ok()));
	// 12 tasks x 40ms on 4 workers is 3 rounds; serial would be ~480ms
	assert!(elapsed < Duration::from_millis(400), "batch took {:?}", elapsed);
}

/// Every file task either committed its full content or wrote nothing, and
/// no temp files survive the run.
#[tokio::test]
async fn test_atomic_tasks_leave_no_residue() {
	let tmp = TempDir::new().unwrap();
	let executor = BatchExecutor::new(4, Duration::from_secs(10));

	let tasks: Vec<Box<dyn Task>> = (0..8)
		.map(|i| {
			write_task(
				&format!("w{}", i),
				tmp.path().join(format!("out-{}.json", i)),
				b"{\"complete\": true}",
			)
		})
		.collect();
	let batch = executor.execute(tasks).await.unwrap();
	assert_eq!(batch.results.len(), 8);

	for i in 0..8 {
		let content = fs::read(tmp.path().join(format!("out-{}.json", i))).unwrap();
		assert_eq!(content, b"{\"complete\": true}");
	}
	let leftovers: Vec<_> = fs::read_dir(tmp.path())
		.unwrap()
		.filter(|e| {
			e.as_ref().unwrap().file_name().to_string_lossy().contains(".tmp.")
		})
		.collect();
	assert!(leftovers.is_empty(), "temp files left behind: {:?}", leftovers);
}

/// After stop() returns the result stream is closed and cancelled tasks
/// never committed anything.
#[tokio::test]
async fn test_stop_quiescence() {
	let tmp = TempDir::new().unwrap();
	let mut pool = WorkerPool::new(1, 8);
	let mut rx = pool.take_results().unwrap();

	// A slow task holds the single worker; queued tasks will observe the
	// cancellation raised by stop() before writing
	pool.submit(Box::new(FnTask::new("slow", 0, |cancel| {
		Box::pin(async move {
			tokio::select! {
				_ = cancel.cancelled() => Err(SyncError::new(ErrorKind::Internal, "slow")
					.with_message("stopped before commit")),
				_ = tokio::time::sleep(Duration::from_secs(30)) => Ok(()),
			}
		})
	})))
	.unwrap();
	let target = tmp.path().join("queued.json");
	pool.submit(write_task("queued", target.clone(), b"should not appear")).unwrap();

	tokio::time::sleep(Duration::from_millis(50)).await;
	pool.stop().await;

	// Exactly the submitted tasks report, then the stream closes
	let mut task_ids = Vec::new();
	while let Some(result) = rx.recv().await {
		task_ids.push(result.task_id);
	}
	task_ids.sort();
	assert_eq!(task_ids, vec!["queued".to_string(), "slow".to_string()]);

	// The queued write observed cancellation before committing
	assert!(!target.exists());
	assert!(fs::read_dir(tmp.path()).unwrap().next().is_none());
}

/// A deadline stops the pool and reports the stragglers explicitly.
#[tokio::test]
async fn test_batch_deadline() {
	let executor = BatchExecutor::new(2, Duration::from_millis(100));
	let mut tasks: Vec<Box<dyn Task>> = Vec::new();
	tasks.push(Box::new(FnTask::new("quick", 0, |_cancel| Box::pin(async { Ok(()) }))));
	tasks.push(Box::new(FnTask::new("stuck", 0, |cancel| {
		Box::pin(async move {
			tokio::select! {
				_ = cancel.cancelled() => Err(SyncError::new(ErrorKind::Internal, "stuck")
					.with_message("stopped before commit")),
				_ = tokio::time::sleep(Duration::from_secs(60)) => Ok(()),
			}
		})
	})));

	let batch = executor.execute(tasks).await.unwrap();
	assert!(batch.timed_out());
	assert_eq!(batch.timed_out, vec!["stuck".to_string()]);
	assert!(batch.results.iter().any(|r| r.task_id == "quick" && r.is_ok()));
}

// vim: ts=4
