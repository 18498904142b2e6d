use std::fs;
use std::time::Duration;

use tempfile::tempdir;

use deepscan::analyser::{AnalyserSpec, CommandAnalyserConfig};
use deepscan::pool::{JobOutcome, JobRequest, WaitStatus, WorkerCommand, WorkerPool};
use deepscan::PoolError;

fn worker_command() -> WorkerCommand {
    WorkerCommand::new(env!("CARGO_BIN_EXE_deepscan"), ["worker"])
}

fn specs() -> Vec<AnalyserSpec> {
    vec![
        AnalyserSpec::License { include_copyright: false, max_file_size: 1_000_000 },
        AnalyserSpec::Command(CommandAnalyserConfig {
            category: "sleepy".to_string(),
            program: "sh".to_string(),
            args: vec!["-c".to_string(), "sleep 10".to_string()],
            patterns: Vec::new(),
            version: "1".to_string(),
            max_file_size: None,
        }),
    ]
}

fn request(category: &str, path: &std::path::Path) -> JobRequest {
    JobRequest {
        category: category.to_string(),
        path: path.to_path_buf(),
        root: path.parent().map(|p| p.to_path_buf()),
    }
}

#[tokio::test]
async fn test_submit_and_wait_for_result() {
    let temp_dir = tempdir().unwrap();
    let file = temp_dir.path().join("NOTICE");
    fs::write(&file, "SPDX-License-Identifier: Apache-2.0\n").unwrap();

    let pool = WorkerPool::spawn(2, worker_command(), &specs()).await.unwrap();
    assert_eq!(pool.size(), 2);

    let mut handle = pool.submit(request("license", &file)).unwrap();
    match pool.wait(&mut handle, Duration::from_secs(30)).await {
        WaitStatus::Ready(JobOutcome::Completed(Some(data))) => {
            assert_eq!(data["spdx"][0], "Apache-2.0");
        }
        other => panic!("unexpected status {:?}", other),
    }

    // 未知类别由 worker 报告为失败
    let mut handle = pool.submit(request("unknown", &file)).unwrap();
    assert!(matches!(
        pool.wait(&mut handle, Duration::from_secs(30)).await,
        WaitStatus::Ready(JobOutcome::Failed(_))
    ));

    // 没有发现时返回空结果
    let empty = temp_dir.path().join("empty.txt");
    fs::write(&empty, "nothing to see here\n").unwrap();
    let mut handle = pool.submit(request("license", &empty)).unwrap();
    assert!(matches!(
        pool.wait(&mut handle, Duration::from_secs(30)).await,
        WaitStatus::Ready(JobOutcome::Completed(None))
    ));

    assert_eq!(pool.restarts(), 0);
    pool.shutdown().await;
}

#[tokio::test]
async fn test_terminate_replaces_hosting_worker() {
    let temp_dir = tempdir().unwrap();
    let file = temp_dir.path().join("NOTICE");
    fs::write(&file, "SPDX-License-Identifier: MIT\n").unwrap();

    let pool = WorkerPool::spawn(1, worker_command(), &specs()).await.unwrap();

    let mut stuck = pool.submit(request("sleepy", &file)).unwrap();
    assert!(matches!(
        pool.wait(&mut stuck, Duration::from_millis(500)).await,
        WaitStatus::Pending
    ));

    let worker = pool.find_hosting_worker(&stuck).expect("job should be running");
    assert_eq!(worker.slot, 0);
    assert_eq!(worker.job, stuck.id());
    assert!(worker.pid.is_some());

    assert!(pool.terminate(worker));
    assert!(matches!(
        pool.wait(&mut stuck, Duration::from_secs(10)).await,
        WaitStatus::Ready(JobOutcome::Abandoned)
    ));
    assert_eq!(pool.restarts(), 1);

    // 结束的任务不再有宿主，重复终止不会影响替换后的进程
    assert!(pool.find_hosting_worker(&stuck).is_none());
    assert!(!pool.terminate(worker));

    let mut handle = pool.submit(request("license", &file)).unwrap();
    match pool.wait(&mut handle, Duration::from_secs(30)).await {
        WaitStatus::Ready(JobOutcome::Completed(Some(data))) => assert_eq!(data["spdx"][0], "MIT"),
        other => panic!("unexpected status {:?}", other),
    }

    pool.shutdown().await;
}

#[tokio::test]
async fn test_terminate_leaves_other_workers_running() {
    let temp_dir = tempdir().unwrap();
    let file = temp_dir.path().join("NOTICE");
    fs::write(&file, "SPDX-License-Identifier: MIT\n").unwrap();

    let pool = WorkerPool::spawn(3, worker_command(), &specs()).await.unwrap();
    let before = pool.worker_pids();
    assert_eq!(before.len(), 3);
    assert!(before.iter().all(Option::is_some));

    let mut stuck = pool.submit(request("sleepy", &file)).unwrap();
    assert!(matches!(
        pool.wait(&mut stuck, Duration::from_millis(500)).await,
        WaitStatus::Pending
    ));

    let worker = pool.find_hosting_worker(&stuck).expect("job should be running");
    assert!(pool.terminate(worker));
    assert!(matches!(
        pool.wait(&mut stuck, Duration::from_secs(10)).await,
        WaitStatus::Ready(JobOutcome::Abandoned)
    ));
    assert_eq!(pool.restarts(), 1);

    let after = pool.worker_pids();
    for slot in 0..3 {
        if slot == worker.slot {
            assert_ne!(after[slot], before[slot]);
            assert!(after[slot].is_some());
        } else {
            assert_eq!(after[slot], before[slot]);
        }
    }

    pool.shutdown().await;
}

#[tokio::test]
async fn test_dropping_running_handle_frees_the_slot() {
    let temp_dir = tempdir().unwrap();
    let file = temp_dir.path().join("NOTICE");
    fs::write(&file, "SPDX-License-Identifier: MIT\n").unwrap();

    let pool = WorkerPool::spawn(1, worker_command(), &specs()).await.unwrap();

    let mut stuck = pool.submit(request("sleepy", &file)).unwrap();
    assert!(matches!(
        pool.wait(&mut stuck, Duration::from_millis(500)).await,
        WaitStatus::Pending
    ));
    assert!(pool.find_hosting_worker(&stuck).is_some());

    // 没有人持有句柄后，执行中的 worker 被替换
    drop(stuck);
    let mut waited = Duration::ZERO;
    while pool.restarts() == 0 && waited < Duration::from_secs(5) {
        tokio::time::sleep(Duration::from_millis(50)).await;
        waited += Duration::from_millis(50);
    }
    assert_eq!(pool.restarts(), 1);

    let mut handle = pool.submit(request("license", &file)).unwrap();
    match pool.wait(&mut handle, Duration::from_secs(5)).await {
        WaitStatus::Ready(JobOutcome::Completed(Some(data))) => assert_eq!(data["spdx"][0], "MIT"),
        other => panic!("unexpected status {:?}", other),
    }

    pool.shutdown().await;
}

#[tokio::test]
async fn test_queued_job_has_no_hosting_worker() {
    let temp_dir = tempdir().unwrap();
    let file = temp_dir.path().join("NOTICE");
    fs::write(&file, "SPDX-License-Identifier: MIT\n").unwrap();

    let pool = WorkerPool::spawn(1, worker_command(), &specs()).await.unwrap();

    let mut stuck = pool.submit(request("sleepy", &file)).unwrap();
    let mut queued = pool.submit(request("license", &file)).unwrap();

    assert!(matches!(
        pool.wait(&mut queued, Duration::from_millis(500)).await,
        WaitStatus::Pending
    ));
    assert!(pool.find_hosting_worker(&queued).is_none());

    // 终止卡住的任务后，排队的任务由替换进程执行
    let worker = pool.find_hosting_worker(&stuck).expect("job should be running");
    assert!(pool.terminate(worker));
    assert!(matches!(
        pool.wait(&mut stuck, Duration::from_secs(10)).await,
        WaitStatus::Ready(JobOutcome::Abandoned)
    ));
    assert!(matches!(
        pool.wait(&mut queued, Duration::from_secs(30)).await,
        WaitStatus::Ready(JobOutcome::Completed(Some(_)))
    ));

    pool.shutdown().await;
}

#[tokio::test]
async fn test_crashed_worker_is_restarted() {
    let temp_dir = tempdir().unwrap();
    let file = temp_dir.path().join("NOTICE");
    fs::write(&file, "x").unwrap();

    let crashing = WorkerCommand::new("sh", ["-c", "read handshake; read request; exit 7"]);
    let pool = WorkerPool::spawn(1, crashing, &specs()).await.unwrap();

    for _ in 0..2 {
        let mut handle = pool.submit(request("license", &file)).unwrap();
        assert!(matches!(
            pool.wait(&mut handle, Duration::from_secs(10)).await,
            WaitStatus::Ready(JobOutcome::Crashed(Some(7)))
        ));
    }
    assert!(pool.restarts() >= 1);

    pool.shutdown().await;
}

#[tokio::test]
async fn test_spawn_failure_is_reported() {
    let missing = WorkerCommand::new("/nonexistent/deepscan-worker", Vec::<String>::new());
    let result = WorkerPool::spawn(1, missing, &specs()).await;
    assert!(matches!(result, Err(PoolError::Spawn { .. })));
}
