use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::protocol::{encode_line, Handshake, Request, Response, WireOutcome};
use crate::analyser::AnalyserSpec;
use crate::errors::PoolError;

/// 空闲槽位的任务编号
const IDLE: u64 = 0;

/// 启动 worker 进程的命令
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub program: OsString,
    pub args: Vec<OsString>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<OsString>, args: impl IntoIterator<Item = impl Into<OsString>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// 当前可执行文件的 `worker` 子命令
    pub fn current_exe() -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?, ["worker"]))
    }
}

/// 提交给进程池的一个 (分析器, 文件) 任务
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub category: String,
    pub path: PathBuf,
    pub root: Option<PathBuf>,
}

/// 任务结果
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// 分析器正常返回（None 表示没有发现）
    Completed(Option<Value>),
    /// 分析器返回了错误
    Failed(String),
    /// worker 进程在执行任务时退出
    Crashed(Option<i32>),
    /// 任务被终止或进程池已关闭，结果永远不会到达
    Abandoned,
}

/// `wait` 的结果
#[derive(Debug)]
pub enum WaitStatus {
    Ready(JobOutcome),
    Pending,
}

/// 已提交任务的句柄，丢弃后排队中的任务会被跳过
#[derive(Debug)]
pub struct JobHandle {
    id: u64,
    rx: oneshot::Receiver<JobOutcome>,
}

impl JobHandle {
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// 正在执行某个任务的 worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerHandle {
    pub slot: usize,
    pub job: u64,
    pub pid: Option<u32>,
}

struct Job {
    id: u64,
    request: JobRequest,
    reply: oneshot::Sender<JobOutcome>,
}

/// 槽位的共享状态，只由对应的驱动任务写入 `current_job`
#[derive(Default)]
struct SlotRecord {
    /// 正在执行的任务编号，在写出请求之前记录
    current_job: AtomicU64,
    /// 请求终止的任务编号
    kill_job: AtomicU64,
    kill: Notify,
    pid: AtomicU32,
    restarts: AtomicU64,
}

/// 一个存活的 worker 进程
struct WorkerProcess {
    child: Child,
    stdin: ChildStdin,
    lines: Lines<BufReader<ChildStdout>>,
}

impl WorkerProcess {
    async fn spawn(command: &WorkerCommand, handshake: &str) -> Result<Self, PoolError> {
        let program = command.program.to_string_lossy().to_string();

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| PoolError::Spawn { program, source })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| PoolError::Protocol("worker stdin is not piped".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PoolError::Protocol("worker stdout is not piped".to_string()))?;

        stdin
            .write_all(handshake.as_bytes())
            .await
            .map_err(|err| PoolError::Protocol(format!("failed to send handshake: {}", err)))?;
        stdin
            .flush()
            .await
            .map_err(|err| PoolError::Protocol(format!("failed to send handshake: {}", err)))?;

        Ok(Self {
            child,
            stdin,
            lines: BufReader::new(stdout).lines(),
        })
    }

    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    fn has_exited(&mut self) -> bool {
        !matches!(self.child.try_wait(), Ok(None))
    }

    async fn exit_code(&mut self) -> Option<i32> {
        self.child.wait().await.ok().and_then(|status| status.code())
    }

    async fn kill(&mut self) {
        if let Err(err) = self.child.kill().await {
            debug!("Failed to kill worker: {}", err);
        }
    }
}

/// 单个任务在 worker 上的执行结果
enum Execution {
    Answered(JobOutcome),
    Killed,
    /// 任务句柄在执行期间被丢弃，没有人再等待结果
    Orphaned,
    Exited(Option<i32>),
    Shutdown,
}

async fn execute(
    worker: &mut WorkerProcess,
    job: &mut Job,
    record: &SlotRecord,
    shutdown: &CancellationToken,
) -> Execution {
    let job_id = job.id;
    let request = Request {
        job: job_id,
        category: job.request.category.clone(),
        path: job.request.path.clone(),
        root: job.request.root.clone(),
    };

    let line = match encode_line(&request) {
        Ok(line) => line,
        Err(err) => return Execution::Answered(JobOutcome::Failed(err.to_string())),
    };

    if worker.stdin.write_all(line.as_bytes()).await.is_err() || worker.stdin.flush().await.is_err() {
        return Execution::Exited(worker.exit_code().await);
    }

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Execution::Shutdown,
            _ = job.reply.closed() => return Execution::Orphaned,
            _ = record.kill.notified() => {
                // 过期的终止请求不影响当前任务
                if record.kill_job.load(Ordering::SeqCst) == job_id {
                    return Execution::Killed;
                }
            }
            line = worker.lines.next_line() => match line {
                Ok(Some(line)) => match serde_json::from_str::<Response>(&line) {
                    Ok(response) if response.job == job_id => {
                        let outcome = match response.outcome {
                            WireOutcome::Completed { data } => JobOutcome::Completed(data),
                            WireOutcome::Failed { message } => JobOutcome::Failed(message),
                        };
                        return Execution::Answered(outcome);
                    }
                    Ok(response) => warn!("Ignoring stale response for job {}", response.job),
                    Err(_) => warn!("Skipping non-protocol worker output: {}", line),
                },
                Ok(None) | Err(_) => return Execution::Exited(worker.exit_code().await),
            }
        }
    }
}

/// 槽位驱动任务：拥有 worker 进程，从共享队列取任务执行，进程退出或被终止时替换
struct SlotDriver {
    index: usize,
    slots: Arc<[SlotRecord]>,
    queue: Arc<Mutex<mpsc::UnboundedReceiver<Job>>>,
    command: WorkerCommand,
    handshake: Arc<String>,
    shutdown: CancellationToken,
}

impl SlotDriver {
    async fn respawn(&self) -> Option<WorkerProcess> {
        let record = &self.slots[self.index];
        match WorkerProcess::spawn(&self.command, &self.handshake).await {
            Ok(worker) => {
                record.pid.store(worker.pid().unwrap_or(0), Ordering::SeqCst);
                record.restarts.fetch_add(1, Ordering::SeqCst);
                debug!("Worker slot {} restarted as pid {:?}", self.index, worker.pid());
                Some(worker)
            }
            Err(err) => {
                error!("Failed to restart worker slot {}: {}", self.index, err);
                None
            }
        }
    }

    async fn next_job(&self) -> Option<Job> {
        tokio::select! {
            _ = self.shutdown.cancelled() => None,
            job = async { self.queue.lock().await.recv().await } => job,
        }
    }

    async fn run(self, mut worker: Option<WorkerProcess>) {
        let record = &self.slots[self.index];

        while let Some(mut job) = self.next_job().await {
            if job.reply.is_closed() {
                debug!("Skipping abandoned job {}", job.id);
                continue;
            }

            let needs_restart = match worker.as_mut() {
                Some(process) => process.has_exited(),
                None => true,
            };
            if needs_restart {
                worker = self.respawn().await;
            }

            let Some(process) = worker.as_mut() else {
                let _ = job.reply.send(JobOutcome::Failed("no worker process available".to_string()));
                continue;
            };

            record.current_job.store(job.id, Ordering::SeqCst);
            let execution = execute(process, &mut job, record, &self.shutdown).await;
            record.current_job.store(IDLE, Ordering::SeqCst);

            match execution {
                Execution::Answered(outcome) => {
                    let _ = job.reply.send(outcome);
                }
                Execution::Killed => {
                    warn!(
                        "Terminated worker slot {} (pid {:?}) running job {}",
                        self.index,
                        process.pid(),
                        job.id
                    );
                    process.kill().await;
                    worker = self.respawn().await;
                    let _ = job.reply.send(JobOutcome::Abandoned);
                }
                Execution::Orphaned => {
                    // 被丢弃的任务无法再被终止，直接替换进程以释放槽位
                    warn!(
                        "Replacing worker slot {} (pid {:?}) running abandoned job {}",
                        self.index,
                        process.pid(),
                        job.id
                    );
                    process.kill().await;
                    worker = self.respawn().await;
                }
                Execution::Exited(code) => {
                    error!(
                        "Worker slot {} exited with code {:?} while running job {}",
                        self.index, code, job.id
                    );
                    let _ = job.reply.send(JobOutcome::Crashed(code));
                    worker = self.respawn().await;
                }
                Execution::Shutdown => {
                    let _ = job.reply.send(JobOutcome::Abandoned);
                    break;
                }
            }
        }

        if let Some(mut process) = worker {
            process.kill().await;
        }
        record.pid.store(0, Ordering::SeqCst);
    }
}

/// 固定大小的 worker 进程池
///
/// 每个槽位由一个驱动任务管理一个 OS 进程，所有槽位从同一个队列取任务。
/// 驱动任务在发出请求之前记录任务编号，因此可以定位并终止执行某个任务的进程，
/// 而不需要被挂起的分析器配合。
pub struct WorkerPool {
    sender: Option<mpsc::UnboundedSender<Job>>,
    slots: Arc<[SlotRecord]>,
    drivers: Vec<JoinHandle<()>>,
    next_job: AtomicU64,
    shutdown: CancellationToken,
}

impl WorkerPool {
    /// 启动 `size` 个 worker（至少一个）
    pub async fn spawn(size: usize, command: WorkerCommand, specs: &[AnalyserSpec]) -> Result<Self, PoolError> {
        let size = size.max(1);
        let handshake = encode_line(&Handshake {
            analysers: specs.to_vec(),
        })
        .map_err(|err| PoolError::Protocol(err.to_string()))?;
        let handshake = Arc::new(handshake);

        let slots: Arc<[SlotRecord]> = (0..size).map(|_| SlotRecord::default()).collect();
        let (sender, receiver) = mpsc::unbounded_channel();
        let queue = Arc::new(Mutex::new(receiver));
        let shutdown = CancellationToken::new();

        let mut drivers = Vec::with_capacity(size);
        for index in 0..size {
            let worker = match WorkerProcess::spawn(&command, &handshake).await {
                Ok(worker) => worker,
                Err(err) => {
                    shutdown.cancel();
                    for driver in drivers {
                        let _ = driver.await;
                    }
                    return Err(err);
                }
            };
            slots[index].pid.store(worker.pid().unwrap_or(0), Ordering::SeqCst);

            let driver = SlotDriver {
                index,
                slots: slots.clone(),
                queue: queue.clone(),
                command: command.clone(),
                handshake: handshake.clone(),
                shutdown: shutdown.clone(),
            };
            drivers.push(tokio::spawn(driver.run(Some(worker))));
        }

        debug!("Started worker pool with {} processes", size);

        Ok(Self {
            sender: Some(sender),
            slots,
            drivers,
            next_job: AtomicU64::new(1),
            shutdown,
        })
    }

    pub fn size(&self) -> usize {
        self.slots.len()
    }

    /// 每个槽位当前 worker 的进程号
    pub fn worker_pids(&self) -> Vec<Option<u32>> {
        self.slots
            .iter()
            .map(|slot| match slot.pid.load(Ordering::SeqCst) {
                0 => None,
                pid => Some(pid),
            })
            .collect()
    }

    /// 所有槽位累计的进程替换次数
    pub fn restarts(&self) -> u64 {
        self.slots.iter().map(|s| s.restarts.load(Ordering::SeqCst)).sum()
    }

    /// 异步提交任务
    pub fn submit(&self, request: JobRequest) -> Result<JobHandle, PoolError> {
        let sender = self.sender.as_ref().ok_or(PoolError::Closed)?;
        let id = self.next_job.fetch_add(1, Ordering::SeqCst);
        let (reply, rx) = oneshot::channel();

        sender
            .send(Job { id, request, reply })
            .map_err(|_| PoolError::Closed)?;

        Ok(JobHandle { id, rx })
    }

    /// 最多等待 `timeout`，超时返回 Pending
    pub async fn wait(&self, handle: &mut JobHandle, timeout: Duration) -> WaitStatus {
        match tokio::time::timeout(timeout, &mut handle.rx).await {
            Ok(Ok(outcome)) => WaitStatus::Ready(outcome),
            Ok(Err(_)) => WaitStatus::Ready(JobOutcome::Abandoned),
            Err(_) => WaitStatus::Pending,
        }
    }

    /// 找到正在执行该任务的 worker，任务仍在排队或已结束时返回 None
    pub fn find_hosting_worker(&self, handle: &JobHandle) -> Option<WorkerHandle> {
        self.slots
            .iter()
            .position(|slot| slot.current_job.load(Ordering::SeqCst) == handle.id)
            .map(|slot| WorkerHandle {
                slot,
                job: handle.id,
                pid: match self.slots[slot].pid.load(Ordering::SeqCst) {
                    0 => None,
                    pid => Some(pid),
                },
            })
    }

    /// 终止执行指定任务的 worker 并由驱动任务替换，任务已结束时不做任何事
    pub fn terminate(&self, worker: WorkerHandle) -> bool {
        let Some(record) = self.slots.get(worker.slot) else {
            return false;
        };

        if record.current_job.load(Ordering::SeqCst) != worker.job {
            return false;
        }

        record.kill_job.store(worker.job, Ordering::SeqCst);
        record.kill.notify_one();
        true
    }

    /// 停止所有 worker，未完成的任务以 Abandoned 结束
    pub async fn shutdown(mut self) {
        self.sender.take();
        self.shutdown.cancel();

        for driver in self.drivers.drain(..) {
            if let Err(err) = driver.await {
                warn!("Worker driver task failed: {}", err);
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // 驱动任务持有的子进程设置了 kill_on_drop
        self.shutdown.cancel();
    }
}
