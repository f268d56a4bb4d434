//! Shared fixtures for coordinator-level integration tests.
//!
//! [`FakeDriver`] stands in for tmux: panes live in memory, every command
//! typed into a pane is recorded, and tests can close panes to simulate
//! processes exiting behind the daemon's back.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sisyphus::coordinator::{AppState, SessionCoordinator};
use sisyphus::driver::{DriverFuture, PaneInfo, ProcessDriver};
use sisyphus::models::Session;
use sisyphus::persistence::{KnownProjects, StateStore};
use sisyphus::{AppError, DaemonConfig};

/// Window every test session runs in.
pub const WINDOW: &str = "@1";
/// The user's own shell pane, present for the whole test.
pub const USER_PANE: &str = "%0";

#[derive(Debug, Default)]
struct FakeState {
    next_pane: u32,
    /// `(window, pane)` pairs currently alive.
    panes: Vec<(String, String)>,
    /// `(pane, command)` pairs in send order.
    sent: Vec<(String, String)>,
    titles: Vec<(String, String)>,
    killed_windows: Vec<String>,
}

/// In-memory multiplexer.
#[derive(Debug, Default)]
pub struct FakeDriver {
    state: Mutex<FakeState>,
    fail_send_keys: AtomicBool,
    /// Milliseconds `kill_pane` takes to return after the pane is gone.
    kill_delay_ms: AtomicU64,
}

impl FakeDriver {
    /// A driver whose [`WINDOW`] already holds the user's pane.
    pub fn with_user_pane() -> Self {
        let driver = Self::default();
        driver
            .state
            .lock()
            .unwrap()
            .panes
            .push((WINDOW.to_owned(), USER_PANE.to_owned()));
        driver
    }

    /// Simulate a pane's process exiting.
    pub fn close_pane(&self, pane_id: &str) {
        self.state.lock().unwrap().panes.retain(|(_, p)| p != pane_id);
    }

    /// Simulate the whole window disappearing.
    pub fn close_window(&self, window: &str) {
        self.state.lock().unwrap().panes.retain(|(w, _)| w != window);
    }

    pub fn is_alive(&self, pane_id: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .panes
            .iter()
            .any(|(_, p)| p == pane_id)
    }

    /// Commands typed into `pane_id`.
    pub fn sent_to(&self, pane_id: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .sent
            .iter()
            .filter(|(p, _)| p == pane_id)
            .map(|(_, c)| c.clone())
            .collect()
    }

    pub fn title_of(&self, pane_id: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .titles
            .iter()
            .rev()
            .find(|(p, _)| p == pane_id)
            .map(|(_, t)| t.clone())
    }

    pub fn killed_windows(&self) -> Vec<String> {
        self.state.lock().unwrap().killed_windows.clone()
    }

    pub fn fail_send_keys(&self, fail: bool) {
        self.fail_send_keys.store(fail, Ordering::SeqCst);
    }

    /// Make `kill_pane` linger after the pane has already died.
    pub fn slow_kill(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap();
        self.kill_delay_ms.store(millis, Ordering::SeqCst);
    }
}

impl ProcessDriver for FakeDriver {
    fn create_pane<'a>(&'a self, window: &'a str, _cwd: &'a Path) -> DriverFuture<'a, String> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state.next_pane += 1;
            let pane_id = format!("%{}", state.next_pane);
            state.panes.push((window.to_owned(), pane_id.clone()));
            Ok(pane_id)
        })
    }

    fn kill_pane<'a>(&'a self, pane_id: &'a str) -> DriverFuture<'a, ()> {
        Box::pin(async move {
            self.close_pane(pane_id);
            let delay = self.kill_delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            Ok(())
        })
    }

    fn kill_window<'a>(&'a self, window: &'a str) -> DriverFuture<'a, ()> {
        Box::pin(async move {
            self.close_window(window);
            self.state
                .lock()
                .unwrap()
                .killed_windows
                .push(window.to_owned());
            Ok(())
        })
    }

    fn list_panes<'a>(&'a self, window: &'a str) -> DriverFuture<'a, Vec<PaneInfo>> {
        Box::pin(async move {
            Ok(self
                .state
                .lock()
                .unwrap()
                .panes
                .iter()
                .filter(|(w, _)| w == window)
                .map(|(_, p)| PaneInfo {
                    pane_id: p.clone(),
                    pid: None,
                })
                .collect())
        })
    }

    fn send_keys<'a>(&'a self, pane_id: &'a str, command: &'a str) -> DriverFuture<'a, ()> {
        Box::pin(async move {
            if self.fail_send_keys.load(Ordering::SeqCst) {
                return Err(AppError::Driver("send-keys refused".into()));
            }
            self.state
                .lock()
                .unwrap()
                .sent
                .push((pane_id.to_owned(), command.to_owned()));
            Ok(())
        })
    }

    fn set_pane_title<'a>(&'a self, pane_id: &'a str, title: &'a str) -> DriverFuture<'a, ()> {
        Box::pin(async move {
            self.state
                .lock()
                .unwrap()
                .titles
                .push((pane_id.to_owned(), title.to_owned()));
            Ok(())
        })
    }

    fn set_pane_style<'a>(&'a self, _pane_id: &'a str, _color: &'a str) -> DriverFuture<'a, ()> {
        Box::pin(async { Ok(()) })
    }

    fn select_layout<'a>(&'a self, _window: &'a str, _layout: &'a str) -> DriverFuture<'a, ()> {
        Box::pin(async { Ok(()) })
    }
}

/// A coordinator wired to a [`FakeDriver`] and temporary directories.
pub struct Harness {
    pub coordinator: SessionCoordinator,
    pub driver: Arc<FakeDriver>,
    /// Project working directory.
    pub cwd: PathBuf,
    /// Daemon-global directory (project index).
    pub home: PathBuf,
    _dirs: (tempfile::TempDir, tempfile::TempDir),
}

/// Config with fast timings for tests.
pub fn test_config(respawn_delay_ms: u64) -> DaemonConfig {
    DaemonConfig {
        poll_interval_ms: 20,
        respawn_delay_ms,
        ..DaemonConfig::default()
    }
}

/// Build a coordinator over `driver` rooted at `home`.
pub fn coordinator_for(
    config: DaemonConfig,
    driver: Arc<FakeDriver>,
    home: &Path,
) -> SessionCoordinator {
    let projects = Arc::new(KnownProjects::load(home.join("projects.json")));
    let state = AppState::new(config, StateStore::default(), driver, projects);
    SessionCoordinator::new(Arc::new(state))
}

pub fn harness_with_delay(respawn_delay_ms: u64) -> Harness {
    let project = tempfile::tempdir().expect("project dir");
    let home = tempfile::tempdir().expect("home dir");
    let driver = Arc::new(FakeDriver::with_user_pane());
    let coordinator = coordinator_for(
        test_config(respawn_delay_ms),
        Arc::clone(&driver),
        home.path(),
    );
    Harness {
        coordinator,
        driver,
        cwd: project.path().to_path_buf(),
        home: home.path().to_path_buf(),
        _dirs: (project, home),
    }
}

pub fn harness() -> Harness {
    harness_with_delay(20)
}

impl Harness {
    pub async fn start(&self, task: &str) -> Session {
        self.coordinator
            .start(task, &self.cwd, "main", WINDOW)
            .await
            .expect("start session")
    }

    pub async fn spawn(&self, session_id: &str, name: &str) -> String {
        self.coordinator
            .spawn_agent(session_id, "dev", name, &format!("{name} instructions"), false)
            .await
            .expect("spawn agent")
    }

    pub fn read(&self, session_id: &str) -> Session {
        self.coordinator.status(session_id).expect("read session")
    }

    /// Pane of the currently open orchestrator cycle.
    pub fn orchestrator_pane(&self, session_id: &str) -> String {
        self.read(session_id)
            .open_cycle()
            .and_then(|c| c.pane_id.clone())
            .expect("open cycle with pane")
    }
}

/// Poll `condition` until it holds or two seconds pass.
pub async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Wait until no respawn is pending for `session_id`.
pub async fn settle(coordinator: &SessionCoordinator, session_id: &str) {
    assert!(
        wait_for(|| !coordinator.respawn_pending(session_id)).await,
        "respawn did not settle"
    );
}
