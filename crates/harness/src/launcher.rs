//! Context launching through a Playwright-driven browser
//!
//! One Node driver process (and the browser it owns) is started on the first
//! launch and shared by every mode run. Each launch gets a fresh browser
//! context and its own bounded message queue; a reader task routes driver
//! output to whichever context is current and drops the rest.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use pagerun_common::{
    Browser, Error, Mode, Result, RunRequest, ServiceWorkerState, StartupFailure,
};

use crate::bootstrap::DRIVER_JS;
use crate::protocol::{DriverCommand, DriverMessage, StartupStage};

/// Capacity of each context's message queue
pub const EVENT_QUEUE_CAPACITY: usize = 256;

const DRIVER_FILE: &str = "pagerun-driver.js";
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Live handle to one browser execution context
///
/// Messages that arrived while the context was starting are kept in a
/// backlog and handed out before anything still queued, so emission order
/// is preserved.
#[derive(Debug)]
pub struct ExecutionContext {
    id: u64,
    mode: Mode,
    backlog: VecDeque<DriverMessage>,
    messages: mpsc::Receiver<DriverMessage>,
}

impl ExecutionContext {
    pub fn new(id: u64, mode: Mode, messages: mpsc::Receiver<DriverMessage>) -> Self {
        Self {
            id,
            mode,
            backlog: VecDeque::new(),
            messages,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Next message for this context; `None` once the route is gone
    pub async fn recv(&mut self) -> Option<DriverMessage> {
        if let Some(message) = self.backlog.pop_front() {
            return Some(message);
        }
        self.messages.recv().await
    }

    /// Startup reads bypass the backlog, which only holds deferred traffic
    async fn recv_startup(&mut self) -> Option<DriverMessage> {
        self.messages.recv().await
    }

    /// Keep a message for after startup
    fn defer(&mut self, message: DriverMessage) {
        self.backlog.push_back(message);
    }
}

/// Turns a mode into a live execution context and tears it down again
#[async_trait]
pub trait ContextLauncher: Send {
    /// Start a context for `request` and wait until it can run test code
    async fn launch(&mut self, request: &RunRequest) -> Result<ExecutionContext>;

    /// Release a context handed out by `launch`
    async fn teardown(&mut self, context: ExecutionContext) -> Result<()>;

    /// Release a context whose `launch` was cancelled before returning
    async fn abort(&mut self) -> Result<()>;

    /// Stop the shared browser engine; safe to call more than once
    async fn shutdown(&mut self) -> Result<()>;
}

/// Configuration for the browser launcher
#[derive(Debug, Clone)]
pub struct LauncherConfig {
    pub node_binary: PathBuf,
    pub browser: Browser,
    pub headless: bool,
    /// Where the driver script is written
    pub work_dir: PathBuf,
    /// Project root; its `node_modules` provides Playwright
    pub project_dir: PathBuf,
    /// Upper bound on context startup, capped by the run timeout
    pub startup_timeout: Duration,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            node_binary: PathBuf::from("node"),
            browser: Browser::Chromium,
            headless: true,
            work_dir: PathBuf::from("build"),
            project_dir: PathBuf::from("."),
            startup_timeout: Duration::from_secs(30),
        }
    }
}

/// The current context's end of its message queue
struct Route {
    context: u64,
    sender: mpsc::Sender<DriverMessage>,
}

type SharedRoute = Arc<Mutex<Option<Route>>>;

fn set_route(route: &SharedRoute, context: u64, sender: mpsc::Sender<DriverMessage>) {
    *route.lock() = Some(Route { context, sender });
}

/// Stop delivering messages for `context`; a newer route is left alone
fn clear_route(route: &SharedRoute, context: u64) {
    let mut guard = route.lock();
    if guard.as_ref().map(|r| r.context) == Some(context) {
        *guard = None;
    }
}

/// Handle to the running Node driver
struct DriverProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    route: SharedRoute,
    reader: JoinHandle<()>,
}

impl DriverProcess {
    async fn spawn(config: &LauncherConfig) -> Result<Self> {
        tokio::fs::create_dir_all(&config.work_dir).await?;
        let script = config.work_dir.join(DRIVER_FILE);
        tokio::fs::write(&script, DRIVER_JS).await?;

        info!(
            "Starting {} driver ({})",
            config.browser,
            if config.headless { "headless" } else { "headed" }
        );

        let mut child = Command::new(&config.node_binary)
            .arg(&script)
            .arg(config.browser.as_str())
            .arg(config.headless.to_string())
            .current_dir(&config.project_dir)
            .env("NODE_PATH", config.project_dir.join("node_modules"))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::Driver(format!(
                    "Failed to spawn {}: {}",
                    config.node_binary.display(),
                    e
                ))
            })?;

        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Driver("driver stdout not captured".to_string()))?;

        let route: SharedRoute = Arc::new(Mutex::new(None));
        let reader = tokio::spawn(pump(stdout, route.clone()));

        Ok(Self {
            child,
            stdin,
            route,
            reader,
        })
    }

    async fn send(&mut self, command: &DriverCommand) -> Result<()> {
        let line = command.encode()?;
        debug!("-> driver: {}", line.trim_end());
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| Error::Driver("driver stdin closed".to_string()))?;
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await?;
        Ok(())
    }

    fn route(&self, context: u64, sender: mpsc::Sender<DriverMessage>) {
        set_route(&self.route, context, sender);
    }

    fn unroute(&self, context: u64) {
        clear_route(&self.route, context);
    }

    async fn stop(mut self) {
        if let Err(e) = self.send(&DriverCommand::Shutdown).await {
            debug!("Driver did not take shutdown command: {}", e);
        }
        self.stdin = None;

        match timeout(SHUTDOWN_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => debug!("Driver exited with {}", status),
            Ok(Err(e)) => warn!("Waiting for driver failed: {}", e),
            Err(_) => {
                warn!("Driver did not exit within {:?}, killing it", SHUTDOWN_GRACE);
                terminate(&mut self.child).await;
            }
        }
        self.reader.abort();
    }
}

/// Ask politely first, then force
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(id) = child.id() {
            if kill(Pid::from_raw(id as i32), Signal::SIGTERM).is_ok()
                && timeout(Duration::from_millis(500), child.wait()).await.is_ok()
            {
                return;
            }
        }
    }

    let _ = child.kill().await;
}

/// Read driver output and route each message to the current context
///
/// Context-addressed messages reach the routed context only when the ids
/// match. Driver-wide messages (`driverError`, undecodable lines, EOF) go to
/// whichever context is live. Returns after delivering `DriverExited`.
async fn pump<R: AsyncRead + Unpin>(output: R, route: SharedRoute) {
    let mut lines = BufReader::new(output).lines();

    loop {
        let message = match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => DriverMessage::decode(&line),
            Ok(None) => DriverMessage::DriverExited,
            Err(e) => {
                warn!("Reading driver output failed: {}", e);
                DriverMessage::DriverExited
            }
        };
        let exited = message == DriverMessage::DriverExited;

        if exited {
            debug!("<- driver: stdout closed");
        } else {
            debug!("<- driver: {}", message.name());
        }

        let sender = {
            let guard = route.lock();
            match guard.as_ref() {
                Some(r) if message.context().map_or(true, |c| c == r.context) => {
                    Some(r.sender.clone())
                }
                _ => None,
            }
        };

        match sender {
            Some(sender) => {
                if sender.send(message).await.is_err() {
                    debug!("Context queue closed; message dropped");
                }
            }
            None => debug!("No live context; message dropped"),
        }

        if exited {
            break;
        }
    }
}

/// Playwright-backed `ContextLauncher`
pub struct BrowserLauncher {
    config: LauncherConfig,
    driver: Option<DriverProcess>,
    next_context: u64,
    /// Context whose launch has not returned yet
    launching: Option<u64>,
}

impl BrowserLauncher {
    pub fn new(config: LauncherConfig) -> Self {
        Self {
            config,
            driver: None,
            next_context: 1,
            launching: None,
        }
    }

    async fn driver(&mut self) -> Result<&mut DriverProcess> {
        if self.driver.is_none() {
            self.driver = Some(DriverProcess::spawn(&self.config).await?);
        }
        self.driver
            .as_mut()
            .ok_or_else(|| Error::Driver("driver not running".to_string()))
    }

    async fn release(&mut self, context: u64) -> Result<()> {
        let Some(driver) = self.driver.as_mut() else {
            return Ok(());
        };
        driver.unroute(context);
        debug!("Releasing context {}", context);
        driver.send(&DriverCommand::Close { context }).await
    }
}

#[async_trait]
impl ContextLauncher for BrowserLauncher {
    async fn launch(&mut self, request: &RunRequest) -> Result<ExecutionContext> {
        let mode = request.mode;
        let startup_failed = |failure| Error::ContextStartup { mode, failure };

        let id = self.next_context;
        self.next_context += 1;
        let startup_timeout = self.config.startup_timeout.min(request.timeout);

        let url = request.entry_url();
        debug!("Launching {} context {} at {}", mode, id, url);
        let launch = DriverCommand::Launch {
            context: id,
            mode,
            url,
            timeout_ms: startup_timeout.as_millis() as u64,
        };

        let driver = self
            .driver()
            .await
            .map_err(|e| startup_failed(driver_unavailable(e)))?;

        let (sender, receiver) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        driver.route(id, sender);
        if let Err(e) = driver.send(&launch).await {
            driver.unroute(id);
            return Err(startup_failed(driver_unavailable(e)));
        }
        self.launching = Some(id);

        let mut context = ExecutionContext::new(id, mode, receiver);
        let failure = match timeout(startup_timeout, await_ready(&mut context)).await {
            Ok(Ok(())) => {
                self.launching = None;
                debug!("Context {} ready", id);
                return Ok(context);
            }
            Ok(Err(failure)) => failure,
            Err(_) => StartupFailure::Timeout(startup_timeout),
        };

        self.launching = None;
        if let Err(e) = self.release(id).await {
            warn!("Releasing failed {} context: {}", mode, e);
        }
        Err(startup_failed(failure))
    }

    async fn teardown(&mut self, context: ExecutionContext) -> Result<()> {
        self.release(context.id()).await
    }

    async fn abort(&mut self) -> Result<()> {
        match self.launching.take() {
            Some(id) => self.release(id).await,
            None => Ok(()),
        }
    }

    async fn shutdown(&mut self) -> Result<()> {
        if let Some(driver) = self.driver.take() {
            info!("Stopping browser driver");
            driver.stop().await;
        }
        Ok(())
    }
}

fn driver_unavailable(e: Error) -> StartupFailure {
    match e {
        Error::Driver(message) => StartupFailure::DriverUnavailable(message),
        other => StartupFailure::DriverUnavailable(other.to_string()),
    }
}

/// Wait until `context` can run test code
///
/// Page and worker modes are ready once the host page has loaded. Service
/// worker mode additionally walks the lifecycle state machine to
/// `activated`. Result traffic seen on the way is kept for later.
pub async fn await_ready(
    context: &mut ExecutionContext,
) -> std::result::Result<(), StartupFailure> {
    let needs_activation = context.mode() == Mode::ServiceWorker;
    let mut loaded = false;
    let mut worker: Option<ServiceWorkerState> = None;

    while let Some(message) = context.recv_startup().await {
        match message {
            DriverMessage::Ready { .. } => {
                loaded = true;
            }
            DriverMessage::Lifecycle { state, .. } => {
                let next: ServiceWorkerState = state.parse()?;
                let current = match worker {
                    None => ServiceWorkerState::begin(next)?,
                    Some(current) => current.advance(next)?,
                };
                debug!("Service worker {}", current);
                worker = Some(current);
            }
            DriverMessage::StartupError { stage, message, .. } => {
                return Err(match stage {
                    StartupStage::Navigation => StartupFailure::Navigation(message),
                    StartupStage::Registration => StartupFailure::Registration(message),
                });
            }
            DriverMessage::Console { level, text, .. } => {
                debug!("[console.{}] {}", level, text);
            }
            DriverMessage::Closed { .. } | DriverMessage::DriverExited => {
                return Err(StartupFailure::DriverExited);
            }
            DriverMessage::DriverError { message } => {
                return Err(StartupFailure::DriverUnavailable(message));
            }
            other @ (DriverMessage::Event { .. }
            | DriverMessage::PageError { .. }
            | DriverMessage::Malformed { .. }) => {
                context.defer(other);
            }
        }

        let activated = worker.map_or(false, ServiceWorkerState::is_ready);
        if loaded && (!needs_activation || activated) {
            return Ok(());
        }
    }

    Err(StartupFailure::DriverExited)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(mode: Mode, messages: Vec<DriverMessage>) -> ExecutionContext {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        for message in messages {
            tx.try_send(message).unwrap();
        }
        // keep the queue open so a missing terminal message blocks instead of closing
        std::mem::forget(tx);
        ExecutionContext::new(7, mode, rx)
    }

    fn lifecycle(state: &str) -> DriverMessage {
        DriverMessage::Lifecycle {
            context: 7,
            state: state.to_string(),
        }
    }

    fn event(raw: &str) -> DriverMessage {
        DriverMessage::Event {
            context: 7,
            event: raw.to_string(),
        }
    }

    #[tokio::test]
    async fn test_page_ready_after_load() {
        let mut ctx = context(Mode::Page, vec![DriverMessage::Ready { context: 7 }]);
        await_ready(&mut ctx).await.unwrap();
    }

    #[tokio::test]
    async fn test_early_events_are_kept_in_order() {
        let mut ctx = context(
            Mode::Worker,
            vec![
                event("first"),
                event("second"),
                DriverMessage::Ready { context: 7 },
                event("third"),
            ],
        );
        await_ready(&mut ctx).await.unwrap();

        for expected in ["first", "second", "third"] {
            assert_eq!(ctx.recv().await, Some(event(expected)));
        }
    }

    #[tokio::test]
    async fn test_service_worker_waits_for_activation() {
        let mut ctx = context(
            Mode::ServiceWorker,
            vec![
                lifecycle("registering"),
                DriverMessage::Ready { context: 7 },
                lifecycle("installing"),
                lifecycle("installed"),
                lifecycle("activating"),
                lifecycle("activated"),
                event("after"),
            ],
        );
        await_ready(&mut ctx).await.unwrap();
        assert_eq!(ctx.recv().await, Some(event("after")));
    }

    #[tokio::test]
    async fn test_service_worker_not_ready_before_activation() {
        let mut ctx = context(
            Mode::ServiceWorker,
            vec![
                DriverMessage::Ready { context: 7 },
                lifecycle("registering"),
                lifecycle("installing"),
            ],
        );
        let waited = timeout(Duration::from_millis(50), await_ready(&mut ctx)).await;
        assert!(waited.is_err(), "ready before activation");
    }

    #[tokio::test]
    async fn test_service_worker_redundant_is_startup_failure() {
        let mut ctx = context(
            Mode::ServiceWorker,
            vec![
                lifecycle("registering"),
                lifecycle("installing"),
                lifecycle("redundant"),
            ],
        );
        let failure = await_ready(&mut ctx).await.unwrap_err();
        match failure {
            StartupFailure::Lifecycle(err) => {
                assert_eq!(err.from, "installing");
                assert_eq!(err.to, "redundant");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_service_worker_out_of_order_is_startup_failure() {
        let mut ctx = context(
            Mode::ServiceWorker,
            vec![lifecycle("registering"), lifecycle("activated")],
        );
        assert!(matches!(
            await_ready(&mut ctx).await,
            Err(StartupFailure::Lifecycle(_))
        ));
    }

    #[tokio::test]
    async fn test_startup_errors_map_to_failures() {
        let mut ctx = context(
            Mode::ServiceWorker,
            vec![DriverMessage::StartupError {
                context: 7,
                stage: StartupStage::Registration,
                message: "SecurityError".into(),
            }],
        );
        assert_eq!(
            await_ready(&mut ctx).await,
            Err(StartupFailure::Registration("SecurityError".into()))
        );

        let mut ctx = context(
            Mode::Page,
            vec![DriverMessage::StartupError {
                context: 7,
                stage: StartupStage::Navigation,
                message: "net::ERR_CONNECTION_REFUSED".into(),
            }],
        );
        assert!(matches!(
            await_ready(&mut ctx).await,
            Err(StartupFailure::Navigation(_))
        ));
    }

    #[tokio::test]
    async fn test_driver_exit_during_startup() {
        let mut ctx = context(Mode::Page, vec![DriverMessage::DriverExited]);
        assert_eq!(await_ready(&mut ctx).await, Err(StartupFailure::DriverExited));

        let (tx, rx) = mpsc::channel(1);
        drop(tx);
        let mut ctx = ExecutionContext::new(1, Mode::Page, rx);
        assert_eq!(await_ready(&mut ctx).await, Err(StartupFailure::DriverExited));
    }

    #[tokio::test]
    async fn test_missing_node_is_startup_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut launcher = BrowserLauncher::new(LauncherConfig {
            node_binary: dir.path().join("no-such-node"),
            work_dir: dir.path().join("build"),
            project_dir: dir.path().to_path_buf(),
            ..Default::default()
        });
        let request = RunRequest {
            base_url: "http://127.0.0.1:1".into(),
            timeout: Duration::from_secs(1),
            mode: Mode::Page,
            runner: Default::default(),
            runner_reporter: None,
        };

        let err = launcher.launch(&request).await.unwrap_err();
        let Error::ContextStartup {
            mode: Mode::Page,
            failure: StartupFailure::DriverUnavailable(message),
        } = &err
        else {
            panic!("unexpected error: {err}");
        };
        assert!(message.starts_with("Failed to spawn"), "{message}");
        assert!(message.contains("no-such-node"), "{message}");
        assert!(!err.to_string().contains("Asset server"), "{err}");
        launcher.abort().await.unwrap();
        launcher.shutdown().await.unwrap();
        launcher.shutdown().await.unwrap();
    }

    async fn write_lines(writer: &mut tokio::io::DuplexStream, lines: &[&str]) {
        for line in lines {
            writer.write_all(line.as_bytes()).await.unwrap();
            writer.write_all(b"\n").await.unwrap();
        }
    }

    fn routed(context: u64) -> (SharedRoute, mpsc::Receiver<DriverMessage>) {
        let route: SharedRoute = Arc::new(Mutex::new(None));
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        set_route(&route, context, tx);
        (route, rx)
    }

    #[tokio::test]
    async fn test_pump_drops_stale_context_messages() {
        let (mut writer, reader) = tokio::io::duplex(4096);
        let (route, mut rx) = routed(3);
        let task = tokio::spawn(pump(reader, route));

        write_lines(
            &mut writer,
            &[
                r#"{"type":"event","context":1,"event":"late"}"#,
                r#"{"type":"closed","context":2}"#,
                "",
                r#"{"type":"ready","context":3}"#,
                r#"{"type":"event","context":3,"event":"mine"}"#,
            ],
        )
        .await;
        drop(writer);

        assert_eq!(rx.recv().await, Some(DriverMessage::Ready { context: 3 }));
        assert_eq!(
            rx.recv().await,
            Some(DriverMessage::Event {
                context: 3,
                event: "mine".into()
            })
        );
        assert_eq!(rx.recv().await, Some(DriverMessage::DriverExited));
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_pump_delivers_driver_wide_messages_to_live_context() {
        let (mut writer, reader) = tokio::io::duplex(4096);
        let (route, mut rx) = routed(5);
        let task = tokio::spawn(pump(reader, route));

        write_lines(
            &mut writer,
            &["not json", r#"{"type":"driverError","message":"browser crashed"}"#],
        )
        .await;

        assert_eq!(
            rx.recv().await,
            Some(DriverMessage::Malformed {
                line: "not json".into()
            })
        );
        assert_eq!(
            rx.recv().await,
            Some(DriverMessage::DriverError {
                message: "browser crashed".into()
            })
        );

        drop(writer);
        assert_eq!(rx.recv().await, Some(DriverMessage::DriverExited));
        task.await.unwrap();
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_pump_follows_route_changes() {
        let (mut writer, reader) = tokio::io::duplex(4096);
        let (route, mut first) = routed(1);
        let task = tokio::spawn(pump(reader, route.clone()));

        write_lines(&mut writer, &[r#"{"type":"ready","context":1}"#]).await;
        assert_eq!(first.recv().await, Some(DriverMessage::Ready { context: 1 }));

        // releasing an older id keeps the current route
        clear_route(&route, 0);
        assert!(route.lock().is_some());

        clear_route(&route, 1);
        let (tx, mut second) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        set_route(&route, 2, tx);

        write_lines(
            &mut writer,
            &[
                r#"{"type":"closed","context":1}"#,
                r#"{"type":"ready","context":2}"#,
            ],
        )
        .await;
        drop(writer);

        assert_eq!(second.recv().await, Some(DriverMessage::Ready { context: 2 }));
        assert_eq!(second.recv().await, Some(DriverMessage::DriverExited));
        task.await.unwrap();

        // the released context saw nothing after its route was cleared
        assert_eq!(first.recv().await, None);
    }

    #[tokio::test]
    async fn test_pump_without_route_drains_and_exits() {
        let (mut writer, reader) = tokio::io::duplex(4096);
        let route: SharedRoute = Arc::new(Mutex::new(None));
        let task = tokio::spawn(pump(reader, route));

        write_lines(&mut writer, &[r#"{"type":"ready","context":9}"#]).await;
        drop(writer);
        task.await.unwrap();
    }
}
