//! Blocking reservation of worker resources around a unit of work

use crate::worker::{UsageBucket, WorkerUsage};
use gridlet_core::{AdmissionConfig, GridletResult, TaskResources, WorkerCapacity, WorkerId};
use std::future::Future;
use tokio::sync::Mutex;

/// Admit `need` on one usage bucket of a worker, run `work`, release
///
/// Waits (asynchronously) until the bucket can accept the requirement,
/// reserves it, runs the unit of work with the lock released so admission
/// checks on the same worker keep making progress, then releases the
/// reservation and wakes every waiter. The release and the wake-up happen
/// on every exit path; `work`'s result is returned verbatim.
///
/// `usage` is the caller-supplied lock guarding the worker's buckets; the
/// bucket's wait condition is bound to it. Waiters hold no lock while
/// parked and re-race on every wake, so there is no FIFO guarantee among
/// them.
///
/// There is no timeout and no cancellation at this layer: a requirement
/// that no amount of freed capacity can satisfy blocks its caller
/// indefinitely. Callers validate feasibility before placing a task here.
pub async fn with_reserved_resources<T, F, Fut>(
    worker: WorkerId,
    caller: &str,
    capacity: &WorkerCapacity,
    config: &AdmissionConfig,
    need: &TaskResources,
    usage: &Mutex<WorkerUsage>,
    bucket: UsageBucket,
    work: F,
) -> GridletResult<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = GridletResult<T>>,
{
    let mut guard = usage.lock().await;
    loop {
        if guard
            .bucket(bucket)
            .can_admit(need, worker, caller, capacity, config)
        {
            break;
        }

        // Register interest before dropping the lock so a release that
        // lands in between still wakes us.
        let waiters = guard.bucket_mut(bucket).waiters();
        let notified = waiters.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        drop(guard);
        notified.await;
        guard = usage.lock().await;
    }

    guard
        .bucket_mut(bucket)
        .reserve(capacity, need, &config.quotas);
    drop(guard);

    let result = work().await;

    let mut guard = usage.lock().await;
    let bucket_usage = guard.bucket_mut(bucket);
    bucket_usage.release(capacity, need, &config.quotas);
    bucket_usage.wake_waiters();
    drop(guard);

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::WorkerHandle;
    use gridlet_core::{GridletError, QuotaTable, TaskKind};
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::{mpsc, oneshot};
    use tokio::time::timeout;

    const GIB: u64 = 1024 * 1024 * 1024;

    fn no_quota_config() -> Arc<AdmissionConfig> {
        Arc::new(AdmissionConfig {
            quotas: QuotaTable::empty(),
            ..AdmissionConfig::default()
        })
    }

    /// Spawn a reservation whose unit of work signals on entry and waits
    /// for permission to finish.
    fn spawn_held_task(
        handle: Arc<WorkerHandle>,
        config: Arc<AdmissionConfig>,
        need: TaskResources,
        started: mpsc::Sender<()>,
        finish: oneshot::Receiver<()>,
    ) -> tokio::task::JoinHandle<GridletResult<()>> {
        tokio::spawn(async move {
            handle
                .with_reserved(UsageBucket::Active, "test", &config, &need, || async move {
                    started.send(()).await.expect("test channel closed");
                    let _ = finish.await;
                    Ok(())
                })
                .await
        })
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_third_reservation_blocks_until_release() {
        // Worker with 8 CPU units, 16 GiB physical, no swap, no GPU
        let handle = Arc::new(WorkerHandle::new(WorkerCapacity::new(8, 16 * GIB, 0)));
        let config = no_quota_config();
        let need = TaskResources::new(TaskKind::Verify, 2 * GIB, 2 * GIB, 4);

        let (started_tx, mut started_rx) = mpsc::channel(4);
        let (finish_a_tx, finish_a_rx) = oneshot::channel();
        let (finish_b_tx, finish_b_rx) = oneshot::channel();

        let task_a = spawn_held_task(
            handle.clone(),
            config.clone(),
            need.clone(),
            started_tx.clone(),
            finish_a_rx,
        );
        let task_b = spawn_held_task(
            handle.clone(),
            config.clone(),
            need.clone(),
            started_tx.clone(),
            finish_b_rx,
        );

        // Both fit concurrently: 4 + 4 threads, 2 + 2 GiB
        timeout(Duration::from_secs(5), started_rx.recv())
            .await
            .expect("first reservation should be admitted");
        timeout(Duration::from_secs(5), started_rx.recv())
            .await
            .expect("second reservation should be admitted");

        {
            let usage = handle.usage.lock().await;
            assert_eq!(usage.active.cpu_in_use, 8);
            assert_eq!(usage.active.mem_min_in_use, 4 * GIB);
        }

        // An identical third requirement cannot be admitted yet
        let (third_tx, mut third_rx) = mpsc::channel(1);
        let third = {
            let handle = handle.clone();
            let config = config.clone();
            let need = need.clone();
            tokio::spawn(async move {
                handle
                    .with_reserved(UsageBucket::Active, "test", &config, &need, || async move {
                        third_tx.send(()).await.expect("test channel closed");
                        Ok(())
                    })
                    .await
            })
        };
        assert!(
            timeout(Duration::from_millis(100), third_rx.recv())
                .await
                .is_err(),
            "third reservation should block while the worker is full"
        );

        // Releasing one of the first two wakes and admits the third
        finish_a_tx.send(()).unwrap();
        timeout(Duration::from_secs(5), third_rx.recv())
            .await
            .expect("third reservation should be admitted after a release");

        finish_b_tx.send(()).unwrap();
        task_a.await.unwrap().unwrap();
        task_b.await.unwrap().unwrap();
        third.await.unwrap().unwrap();

        let usage = handle.usage.lock().await;
        assert_eq!(usage.active.cpu_in_use, 0);
        assert_eq!(usage.active.mem_min_in_use, 0);
        assert_eq!(usage.active.mem_max_in_use, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_quota_blocks_excess_kind_parallelism() {
        let handle = Arc::new(WorkerHandle::new(WorkerCapacity::new(64, 256 * GIB, 0)));
        let mut config = AdmissionConfig::default();
        config.quotas.set(TaskKind::Ingest, Some(2));
        let config = Arc::new(config);
        let need = TaskResources::new(TaskKind::Ingest, GIB, GIB, 1);

        let (started_tx, mut started_rx) = mpsc::channel(4);
        let (finish_a_tx, finish_a_rx) = oneshot::channel();
        let (finish_b_tx, finish_b_rx) = oneshot::channel();
        let (finish_c_tx, finish_c_rx) = oneshot::channel();

        let task_a = spawn_held_task(
            handle.clone(),
            config.clone(),
            need.clone(),
            started_tx.clone(),
            finish_a_rx,
        );
        let task_b = spawn_held_task(
            handle.clone(),
            config.clone(),
            need.clone(),
            started_tx.clone(),
            finish_b_rx,
        );

        timeout(Duration::from_secs(5), started_rx.recv())
            .await
            .expect("first ingest should be admitted");
        timeout(Duration::from_secs(5), started_rx.recv())
            .await
            .expect("second ingest should be admitted");

        {
            let usage = handle.usage.lock().await;
            assert_eq!(usage.active.kind_count(TaskKind::Ingest), 2);
        }

        // Quota is 2: the third ingest waits despite ample CPU and memory
        let task_c = spawn_held_task(
            handle.clone(),
            config.clone(),
            need.clone(),
            started_tx.clone(),
            finish_c_rx,
        );
        assert!(
            timeout(Duration::from_millis(100), started_rx.recv())
                .await
                .is_err(),
            "third ingest should block at the quota"
        );

        finish_b_tx.send(()).unwrap();
        timeout(Duration::from_secs(5), started_rx.recv())
            .await
            .expect("third ingest should be admitted after a release");

        finish_a_tx.send(()).unwrap();
        finish_c_tx.send(()).unwrap();
        task_a.await.unwrap().unwrap();
        task_b.await.unwrap().unwrap();
        task_c.await.unwrap().unwrap();

        let usage = handle.usage.lock().await;
        assert_eq!(usage.active.kind_count(TaskKind::Ingest), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_admissions_never_exceed_cpu_budget() {
        let cpus = 8u64;
        let handle = Arc::new(WorkerHandle::new(WorkerCapacity::new(cpus, 1024 * GIB, 0)));
        let config = no_quota_config();

        let in_flight = Arc::new(AtomicU64::new(0));
        let violated = Arc::new(AtomicBool::new(false));

        let mut tasks = Vec::new();
        // Deterministic pseudo-random thread demands
        let mut seed = 0x2545f4914f6cdd1du64;
        for _ in 0..24 {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let threads = seed % 4 + 1;
            let delay_ms = (seed >> 32) & 0x3;

            let handle = handle.clone();
            let config = config.clone();
            let in_flight = in_flight.clone();
            let violated = violated.clone();
            tasks.push(tokio::spawn(async move {
                let need = TaskResources::new(TaskKind::Verify, GIB, GIB, threads);
                handle
                    .with_reserved(UsageBucket::Active, "fuzz", &config, &need, || async move {
                        let now = in_flight.fetch_add(threads, Ordering::SeqCst) + threads;
                        if now > cpus {
                            violated.store(true, Ordering::SeqCst);
                        }
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                        in_flight.fetch_sub(threads, Ordering::SeqCst);
                        Ok(())
                    })
                    .await
            }));
        }

        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert!(
            !violated.load(Ordering::SeqCst),
            "simultaneously admitted thread-equivalents exceeded the CPU budget"
        );
        let usage = handle.usage.lock().await;
        assert_eq!(usage.active.cpu_in_use, 0);
        assert_eq!(usage.active.mem_min_in_use, 0);
    }

    #[tokio::test]
    async fn test_work_error_propagates_after_release() {
        let handle = Arc::new(WorkerHandle::new(WorkerCapacity::new(8, 16 * GIB, 0)));
        let config = no_quota_config();
        let need = TaskResources::new(TaskKind::Verify, GIB, GIB, 2);

        let result: GridletResult<()> = handle
            .with_reserved(UsageBucket::Active, "test", &config, &need, || async {
                Err(GridletError::Task("unit of work failed".to_string()))
            })
            .await;

        assert!(matches!(result, Err(GridletError::Task(_))));

        // Resources were released despite the failure
        let usage = handle.usage.lock().await;
        assert_eq!(usage.active.cpu_in_use, 0);
        assert_eq!(usage.active.mem_min_in_use, 0);
    }

    #[tokio::test]
    async fn test_buckets_account_independently() {
        let handle = Arc::new(WorkerHandle::new(WorkerCapacity::new(4, 16 * GIB, 0)));
        let config = no_quota_config();
        let need = TaskResources::new(TaskKind::Verify, GIB, GIB, 4);

        // Saturating the preparing bucket leaves the active bucket open
        let (started_tx, mut started_rx) = mpsc::channel(1);
        let (finish_tx, finish_rx) = oneshot::channel();
        let preparing = {
            let handle = handle.clone();
            let config = config.clone();
            let need = need.clone();
            tokio::spawn(async move {
                handle
                    .with_reserved(
                        UsageBucket::Preparing,
                        "test",
                        &config,
                        &need,
                        || async move {
                            started_tx.send(()).await.expect("test channel closed");
                            let _ = finish_rx.await;
                            Ok(())
                        },
                    )
                    .await
            })
        };
        timeout(Duration::from_secs(5), started_rx.recv())
            .await
            .expect("preparing reservation should be admitted");

        let active: GridletResult<()> = handle
            .with_reserved(UsageBucket::Active, "test", &config, &need, || async {
                Ok(())
            })
            .await;
        assert!(active.is_ok());

        finish_tx.send(()).unwrap();
        preparing.await.unwrap().unwrap();
    }
}
