//! Decoder execution strategies: the `DemoReader` poll loop
//! runs inline, on a single dedicated thread, or inside a child process, with
//! a uniform async surface so the orchestrator never cares which. Grounded in
//! `original_source/server/worker.py` (`worker_loop`, `start_worker`) and
//! `original_source/server/ws_server.py`'s `_start_worker`/`_stop_worker`/
//! `_poll_worker`/`_poll_parser`.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::mpsc as std_mpsc;
use std::time::{Duration, Instant};

use dem_proto::DemoDecoderFactory;
use serde::{Deserialize, Serialize};
use snapshot_engine::{DemoReader, EngineError, ReaderSettings, Snapshot};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::oneshot;
use tracing::warn;

const WORKER_POLL_TIMEOUT: Duration = Duration::from_secs(2);
const WORKER_BACKOFF_MIN: Duration = Duration::from_secs(1);
const WORKER_BACKOFF_MAX: Duration = Duration::from_secs(30);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutorMode {
    Inline,
    Thread,
    Process,
}

impl ExecutorMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutorMode::Inline => "none",
            ExecutorMode::Thread => "thread",
            ExecutorMode::Process => "process",
        }
    }
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("worker has no demo loaded")]
    NoDemo,
    #[error("worker poll timed out")]
    Timeout,
    #[error("worker crashed")]
    Crashed,
}

/// Parameters needed to (re)open a `DemoReader`, carried across whichever
/// execution boundary the configured mode uses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DemoParams {
    pub path: PathBuf,
    pub bounds_file: PathBuf,
    pub radar_meta_dir: PathBuf,
    pub overview_dir: PathBuf,
    pub tick_window: u64,
    pub tick_window_min: u64,
    pub tick_window_max: u64,
    pub event_parse_interval_secs: f64,
}

impl DemoParams {
    fn reader_settings(&self) -> ReaderSettings {
        ReaderSettings {
            tick_window: self.tick_window,
            tick_window_min: self.tick_window_min,
            tick_window_max: self.tick_window_max,
            event_parse_interval: Duration::from_secs_f64(self.event_parse_interval_secs),
        }
    }
}

/// Uniform handle the orchestrator drives regardless of executor mode.
pub enum DemoWorker {
    Inline(InlineWorker),
    Thread(ThreadWorker),
    Process(ProcessWorker),
}

impl DemoWorker {
    pub fn new(mode: ExecutorMode, factory: std::sync::Arc<dyn DemoDecoderFactory>) -> Self {
        match mode {
            ExecutorMode::Inline => DemoWorker::Inline(InlineWorker::new(factory)),
            ExecutorMode::Thread => DemoWorker::Thread(ThreadWorker::new(factory)),
            ExecutorMode::Process => DemoWorker::Process(ProcessWorker::new()),
        }
    }

    pub fn mode(&self) -> ExecutorMode {
        match self {
            DemoWorker::Inline(_) => ExecutorMode::Inline,
            DemoWorker::Thread(_) => ExecutorMode::Thread,
            DemoWorker::Process(_) => ExecutorMode::Process,
        }
    }

    pub async fn set_demo(&mut self, params: DemoParams) -> Result<(), WorkerError> {
        match self {
            DemoWorker::Inline(w) => w.set_demo(params),
            DemoWorker::Thread(w) => w.set_demo(params).await,
            DemoWorker::Process(w) => w.set_demo(params).await,
        }
    }

    pub async fn poll_incremental(&mut self) -> Result<Option<Snapshot>, WorkerError> {
        match self {
            DemoWorker::Inline(w) => w.poll_incremental(),
            DemoWorker::Thread(w) => w.poll_incremental().await,
            DemoWorker::Process(w) => w.poll_incremental().await,
        }
    }

    pub async fn poll_window(&mut self, start_tick: i64, size: Option<u64>) -> Result<Option<Snapshot>, WorkerError> {
        match self {
            DemoWorker::Inline(w) => w.poll_window(start_tick, size),
            DemoWorker::Thread(w) => w.poll_window(start_tick, size).await,
            DemoWorker::Process(w) => w.poll_window(start_tick, size).await,
        }
    }

    pub async fn reset_events(&mut self) -> Result<(), WorkerError> {
        match self {
            DemoWorker::Inline(w) => w.reset_events(),
            DemoWorker::Thread(w) => w.reset_events().await,
            DemoWorker::Process(w) => w.reset_events().await,
        }
    }

    /// Seconds until the process executor's next respawn attempt, for
    /// metrics/tests. `None` for executors that never back off.
    pub fn backoff_remaining(&self) -> Option<Duration> {
        match self {
            DemoWorker::Process(w) => w.backoff_remaining(),
            _ => None,
        }
    }
}

/// Runs the decoder directly on whatever task calls it. The only mode
/// acceptable for tests.
pub struct InlineWorker {
    factory: std::sync::Arc<dyn DemoDecoderFactory>,
    reader: Option<DemoReader>,
}

impl InlineWorker {
    pub fn new(factory: std::sync::Arc<dyn DemoDecoderFactory>) -> Self {
        Self { factory, reader: None }
    }

    fn open(&mut self, params: &DemoParams) -> Result<(), WorkerError> {
        let decoder = self.factory.open(&params.path).map_err(EngineError::from)?;
        self.reader = Some(DemoReader::new(
            decoder,
            params.path.clone(),
            params.bounds_file.clone(),
            params.radar_meta_dir.clone(),
            params.overview_dir.clone(),
            params.reader_settings(),
        ));
        Ok(())
    }

    pub fn set_demo(&mut self, params: DemoParams) -> Result<(), WorkerError> {
        self.open(&params)
    }

    pub fn poll_incremental(&mut self) -> Result<Option<Snapshot>, WorkerError> {
        let reader = self.reader.as_mut().ok_or(WorkerError::NoDemo)?;
        Ok(reader.parse_incremental()?)
    }

    pub fn poll_window(&mut self, start_tick: i64, size: Option<u64>) -> Result<Option<Snapshot>, WorkerError> {
        let reader = self.reader.as_mut().ok_or(WorkerError::NoDemo)?;
        Ok(reader.parse_window(start_tick, size)?)
    }

    pub fn reset_events(&mut self) -> Result<(), WorkerError> {
        let reader = self.reader.as_mut().ok_or(WorkerError::NoDemo)?;
        reader.reset_events();
        Ok(())
    }
}

enum ThreadJob {
    SetDemo(DemoParams),
    PollIncremental,
    PollWindow(i64, Option<u64>),
    ResetEvents,
}

enum ThreadReply {
    Snapshot(Option<Snapshot>),
    Ack,
    Err(WorkerError),
}

/// A single dedicated OS thread owning one `DemoReader`, a single-worker
/// pool that awaits one outstanding job at a time.
/// On any channel failure the worker is considered dead and every
/// subsequent call (and the one that just failed) falls back to running
/// inline.
pub struct ThreadWorker {
    factory: std::sync::Arc<dyn DemoDecoderFactory>,
    jobs: Option<std_mpsc::Sender<(ThreadJob, oneshot::Sender<ThreadReply>)>>,
    handle: Option<std::thread::JoinHandle<()>>,
    fallback: InlineWorker,
    dead: bool,
}

impl ThreadWorker {
    pub fn new(factory: std::sync::Arc<dyn DemoDecoderFactory>) -> Self {
        let mut worker = Self {
            factory: factory.clone(),
            jobs: None,
            handle: None,
            fallback: InlineWorker::new(factory),
            dead: false,
        };
        worker.spawn();
        worker
    }

    fn spawn(&mut self) {
        let (tx, rx) = std_mpsc::channel::<(ThreadJob, oneshot::Sender<ThreadReply>)>();
        let factory = self.factory.clone();
        let handle = std::thread::Builder::new()
            .name("demo-worker".into())
            .spawn(move || thread_loop(factory, rx))
            .expect("spawn demo-worker thread");
        self.jobs = Some(tx);
        self.handle = Some(handle);
        self.dead = false;
    }

    async fn call(&mut self, job: ThreadJob) -> Result<ThreadReply, ()> {
        let Some(tx) = self.jobs.as_ref() else { return Err(()) };
        let (reply_tx, reply_rx) = oneshot::channel();
        if tx.send((job, reply_tx)).is_err() {
            return Err(());
        }
        reply_rx.await.map_err(|_| ())
    }

    pub async fn set_demo(&mut self, params: DemoParams) -> Result<(), WorkerError> {
        if self.dead {
            return self.fallback.set_demo(params);
        }
        match self.call(ThreadJob::SetDemo(params.clone())).await {
            Ok(ThreadReply::Ack) => Ok(()),
            Ok(ThreadReply::Err(err)) => Err(err),
            Ok(ThreadReply::Snapshot(_)) => Ok(()),
            Err(()) => {
                warn!("demo-worker thread unresponsive, falling back to inline execution");
                self.dead = true;
                self.fallback.set_demo(params)
            }
        }
    }

    pub async fn poll_incremental(&mut self) -> Result<Option<Snapshot>, WorkerError> {
        if self.dead {
            return self.fallback.poll_incremental();
        }
        match self.call(ThreadJob::PollIncremental).await {
            Ok(ThreadReply::Snapshot(snap)) => Ok(snap),
            Ok(ThreadReply::Err(err)) => Err(err),
            Ok(ThreadReply::Ack) => Ok(None),
            Err(()) => {
                warn!("demo-worker thread unresponsive, falling back to inline execution");
                self.dead = true;
                self.fallback.poll_incremental()
            }
        }
    }

    pub async fn poll_window(&mut self, start_tick: i64, size: Option<u64>) -> Result<Option<Snapshot>, WorkerError> {
        if self.dead {
            return self.fallback.poll_window(start_tick, size);
        }
        match self.call(ThreadJob::PollWindow(start_tick, size)).await {
            Ok(ThreadReply::Snapshot(snap)) => Ok(snap),
            Ok(ThreadReply::Err(err)) => Err(err),
            Ok(ThreadReply::Ack) => Ok(None),
            Err(()) => {
                warn!("demo-worker thread unresponsive, falling back to inline execution");
                self.dead = true;
                self.fallback.poll_window(start_tick, size)
            }
        }
    }

    pub async fn reset_events(&mut self) -> Result<(), WorkerError> {
        if self.dead {
            return self.fallback.reset_events();
        }
        match self.call(ThreadJob::ResetEvents).await {
            Ok(ThreadReply::Ack) => Ok(()),
            Ok(ThreadReply::Err(err)) => Err(err),
            Ok(ThreadReply::Snapshot(_)) => Ok(()),
            Err(()) => {
                warn!("demo-worker thread unresponsive, falling back to inline execution");
                self.dead = true;
                self.fallback.reset_events()
            }
        }
    }
}

impl Drop for ThreadWorker {
    fn drop(&mut self) {
        self.jobs.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn thread_loop(
    factory: std::sync::Arc<dyn DemoDecoderFactory>,
    rx: std_mpsc::Receiver<(ThreadJob, oneshot::Sender<ThreadReply>)>,
) {
    let mut worker = InlineWorker::new(factory);
    for (job, reply) in rx {
        let result = match job {
            ThreadJob::SetDemo(params) => match worker.set_demo(params) {
                Ok(()) => ThreadReply::Ack,
                Err(err) => ThreadReply::Err(err),
            },
            ThreadJob::PollIncremental => match worker.poll_incremental() {
                Ok(snap) => ThreadReply::Snapshot(snap),
                Err(err) => ThreadReply::Err(err),
            },
            ThreadJob::PollWindow(start_tick, size) => match worker.poll_window(start_tick, size) {
                Ok(snap) => ThreadReply::Snapshot(snap),
                Err(err) => ThreadReply::Err(err),
            },
            ThreadJob::ResetEvents => match worker.reset_events() {
                Ok(()) => ThreadReply::Ack,
                Err(err) => ThreadReply::Err(err),
            },
        };
        let _ = reply.send(result);
    }
}

/// Wire protocol spoken with the child process over piped stdio: one JSON
/// object per line each direction. Deliberately tiny — this is an internal
/// IPC format, not the subscriber-facing protocol in `wire.rs`.
#[derive(Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
enum ChildRequest {
    SetDemo { params: DemoParams },
    PollIncremental,
    PollWindow { start_tick: i64, size: Option<u64> },
    ResetEvents,
}

#[derive(Serialize, Deserialize)]
struct ChildResponse {
    ok: bool,
    snapshot: Option<Snapshot>,
    error: Option<String>,
}

struct RunningChild {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

/// Hosts the decoder in a child process, the `process` executor.
/// The child is this same binary invoked with the internal `--worker-child`
/// flag (see `main.rs`); on crash or an unresponsive poll (2s) it is reaped
/// and re-spawned with exponential backoff starting at 1s, doubling, capped
/// at 30s, mirroring `ws_server.py`'s `worker_backoff`/`worker_restart_at`.
pub struct ProcessWorker {
    running: Option<RunningChild>,
    pending_demo: Option<DemoParams>,
    backoff: Duration,
    restart_at: Instant,
}

impl ProcessWorker {
    pub fn new() -> Self {
        Self {
            running: None,
            pending_demo: None,
            backoff: WORKER_BACKOFF_MIN,
            restart_at: Instant::now(),
        }
    }

    pub fn backoff_remaining(&self) -> Option<Duration> {
        if self.running.is_some() {
            return None;
        }
        Some(self.restart_at.saturating_duration_since(Instant::now()))
    }

    fn spawn_child(&mut self) -> Result<(), WorkerError> {
        let exe = std::env::current_exe().map_err(|err| WorkerError::Engine(EngineError::Io(err)))?;
        let mut child = Command::new(exe)
            .arg("--worker-child")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| WorkerError::Engine(EngineError::Io(err)))?;

        let stdin = child.stdin.take().ok_or(WorkerError::Crashed)?;
        let stdout = child.stdout.take().ok_or(WorkerError::Crashed)?;
        self.running = Some(RunningChild { child, stdin, stdout: BufReader::new(stdout) });
        self.backoff = WORKER_BACKOFF_MIN;
        Ok(())
    }

    fn reap(&mut self) {
        if let Some(mut running) = self.running.take() {
            let _ = running.child.start_kill();
        }
        self.restart_at = Instant::now() + self.backoff;
        self.backoff = (self.backoff * 2).min(WORKER_BACKOFF_MAX);
    }

    async fn ensure_running(&mut self) -> Result<(), WorkerError> {
        if self.running.is_some() {
            return Ok(());
        }
        if Instant::now() < self.restart_at {
            return Err(WorkerError::Crashed);
        }
        self.spawn_child()?;
        if let Some(params) = self.pending_demo.clone() {
            self.send_request(&ChildRequest::SetDemo { params }).await?;
        }
        Ok(())
    }

    async fn send_request(&mut self, request: &ChildRequest) -> Result<ChildResponse, WorkerError> {
        let Some(running) = self.running.as_mut() else { return Err(WorkerError::Crashed) };

        let mut line = serde_json::to_string(request).map_err(|_| WorkerError::Crashed)?;
        line.push('\n');

        let write_and_read = async {
            running.stdin.write_all(line.as_bytes()).await?;
            let mut response_line = String::new();
            let bytes_read = running.stdout.read_line(&mut response_line).await?;
            if bytes_read == 0 {
                return Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "worker child exited"));
            }
            Ok(response_line)
        };

        match tokio::time::timeout(WORKER_POLL_TIMEOUT, write_and_read).await {
            Ok(Ok(response_line)) => {
                serde_json::from_str::<ChildResponse>(&response_line).map_err(|_| WorkerError::Crashed)
            }
            Ok(Err(err)) => {
                warn!(error = %err, "worker child I/O failed");
                self.reap();
                Err(WorkerError::Crashed)
            }
            Err(_) => {
                warn!("worker child poll timed out after 2s");
                self.reap();
                Err(WorkerError::Timeout)
            }
        }
    }

    pub async fn set_demo(&mut self, params: DemoParams) -> Result<(), WorkerError> {
        self.pending_demo = Some(params.clone());
        self.ensure_running().await?;
        let response = self.send_request(&ChildRequest::SetDemo { params }).await?;
        if response.ok {
            Ok(())
        } else {
            Err(WorkerError::Crashed)
        }
    }

    pub async fn poll_incremental(&mut self) -> Result<Option<Snapshot>, WorkerError> {
        self.ensure_running().await?;
        let response = self.send_request(&ChildRequest::PollIncremental).await?;
        decode_poll_response(response)
    }

    pub async fn poll_window(&mut self, start_tick: i64, size: Option<u64>) -> Result<Option<Snapshot>, WorkerError> {
        self.ensure_running().await?;
        let response = self.send_request(&ChildRequest::PollWindow { start_tick, size }).await?;
        decode_poll_response(response)
    }

    pub async fn reset_events(&mut self) -> Result<(), WorkerError> {
        self.ensure_running().await?;
        let response = self.send_request(&ChildRequest::ResetEvents).await?;
        if response.ok {
            Ok(())
        } else {
            Err(WorkerError::Crashed)
        }
    }
}

fn decode_poll_response(response: ChildResponse) -> Result<Option<Snapshot>, WorkerError> {
    if !response.ok {
        return Err(WorkerError::NoDemo);
    }
    Ok(response.snapshot)
}

/// Entry point for the child side of the process executor (dispatched from
/// `main.rs` when `--worker-child` is present). Reads one `ChildRequest` per
/// line from stdin, replies with one `ChildResponse` per line on stdout.
pub async fn run_worker_child(factory: std::sync::Arc<dyn DemoDecoderFactory>) -> std::io::Result<()> {
    let stdin = tokio::io::stdin();
    let mut reader = BufReader::new(stdin);
    let mut stdout = tokio::io::stdout();
    let mut worker = InlineWorker::new(factory);

    let mut line = String::new();
    loop {
        line.clear();
        let bytes_read = reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            break;
        }
        let request: ChildRequest = match serde_json::from_str(&line) {
            Ok(req) => req,
            Err(_) => continue,
        };

        let response = match request {
            ChildRequest::SetDemo { params } => match worker.set_demo(params) {
                Ok(()) => ChildResponse { ok: true, snapshot: None, error: None },
                Err(err) => ChildResponse { ok: false, snapshot: None, error: Some(err.to_string()) },
            },
            ChildRequest::PollIncremental => match worker.poll_incremental() {
                Ok(snap) => ChildResponse { ok: true, snapshot: snap, error: None },
                Err(err) => ChildResponse { ok: false, snapshot: None, error: Some(err.to_string()) },
            },
            ChildRequest::PollWindow { start_tick, size } => match worker.poll_window(start_tick, size) {
                Ok(snap) => ChildResponse { ok: true, snapshot: snap, error: None },
                Err(err) => ChildResponse { ok: false, snapshot: None, error: Some(err.to_string()) },
            },
            ChildRequest::ResetEvents => match worker.reset_events() {
                Ok(()) => ChildResponse { ok: true, snapshot: None, error: None },
                Err(err) => ChildResponse { ok: false, snapshot: None, error: Some(err.to_string()) },
            },
        };

        let mut encoded = serde_json::to_string(&response).unwrap_or_else(|_| {
            serde_json::to_string(&ChildResponse { ok: false, snapshot: None, error: Some("encode failed".into()) })
                .expect("fallback response always encodes")
        });
        encoded.push('\n');
        stdout.write_all(encoded.as_bytes()).await?;
        stdout.flush().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dem_proto::{DecoderResult, DemoDecoder, DemoHeader, FakeDecoder};
    use std::path::Path;

    struct AlwaysEmptyFactory;
    impl DemoDecoderFactory for AlwaysEmptyFactory {
        fn open(&self, path: &Path) -> DecoderResult<Box<dyn DemoDecoder>> {
            let map_name = path.file_stem().and_then(|s| s.to_str()).map(str::to_string);
            Ok(Box::new(FakeDecoder::new().with_header(DemoHeader { map_name, ..Default::default() })))
        }
    }

    fn params(path: PathBuf) -> DemoParams {
        DemoParams {
            path,
            bounds_file: PathBuf::from("/nonexistent/bounds.json"),
            radar_meta_dir: PathBuf::from("/nonexistent/radar_meta"),
            overview_dir: PathBuf::from("/nonexistent/overview"),
            tick_window: 256,
            tick_window_min: 256,
            tick_window_max: 2048,
            event_parse_interval_secs: 2.0,
        }
    }

    #[test]
    fn inline_worker_requires_a_demo_before_polling() {
        let mut worker = InlineWorker::new(std::sync::Arc::new(AlwaysEmptyFactory));
        assert!(matches!(worker.poll_incremental(), Err(WorkerError::NoDemo)));
    }

    #[tokio::test]
    async fn thread_worker_mirrors_inline_results() {
        let dir = std::env::temp_dir().join(format!("worker-test-{:?}", Instant::now()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("current.dem");
        std::fs::write(&path, b"HL2DEMO\0").unwrap();

        let mut worker = DemoWorker::new(ExecutorMode::Thread, std::sync::Arc::new(AlwaysEmptyFactory));
        worker.set_demo(params(path)).await.unwrap();
        let snapshot = worker.poll_incremental().await.unwrap();
        assert!(snapshot.is_none(), "empty fake decoder produces no ticks");
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn executor_mode_names_match_original_flag_values() {
        assert_eq!(ExecutorMode::Inline.as_str(), "none");
        assert_eq!(ExecutorMode::Thread.as_str(), "thread");
        assert_eq!(ExecutorMode::Process.as_str(), "process");
    }

    #[test]
    fn process_worker_backoff_doubles_and_caps_at_thirty_seconds() {
        let mut worker = ProcessWorker::new();
        worker.reap();
        assert_eq!(worker.backoff, Duration::from_secs(2));
        worker.reap();
        assert_eq!(worker.backoff, Duration::from_secs(4));
        for _ in 0..10 {
            worker.reap();
        }
        assert_eq!(worker.backoff, WORKER_BACKOFF_MAX);
    }
}
