use std::ffi::OsString;
use std::fs::OpenOptions;
use std::future::{pending, Future};
use std::path::Path;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};

use cloudsaver_core::{Layout, Settings};
use cloudsaver_sync::{
    log_failures, resync, run_cycle, CycleReport, ResyncReport, SessionState, SyncContext,
    SyncError,
};

use crate::child::{GameProcess, StopOutcome};
use crate::error::{io_err, SessionError};
use crate::log_rotation::rotate_session_log;
use crate::paths::{ensure_dir, logs_dir};
use crate::redirect;

/// Everything needed to wrap one game launch.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub settings: Settings,
    pub layout: Layout,
    /// Program and arguments, forwarded verbatim.
    pub command: Vec<OsString>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Starting,
    Running,
    Draining,
    Stopped,
}

/// How a session ended.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub stop: StopOutcome,
    pub cycles: u64,
    /// Ctrl-C asked the wrapper to stop the child.
    pub interrupted: bool,
    pub sync_failed: bool,
    pub restore_failed: bool,
}

impl SessionSummary {
    /// Process exit code for the wrapper.
    ///
    /// A non-zero child exit code is passed through; otherwise a sync or
    /// restore failure yields 1.
    pub fn exit_code(&self) -> i32 {
        let failed = self.sync_failed || self.restore_failed;
        match self.stop.exit_status().and_then(|status| status.code()) {
            Some(code) if code != 0 => code,
            _ if failed => 1,
            Some(_) => 0,
            None if self.interrupted => 130,
            None => 1,
        }
    }
}

/// Build a current-thread runtime, install logging, and run one session.
pub fn start_blocking(options: SessionOptions) -> Result<SessionSummary, SessionError> {
    init_tracing(Some(&options.layout));
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run_session(options))
}

/// Redirect the directories, supervise the child while syncing, and put
/// everything back. Ctrl-C stops the child and drains.
///
/// Only failures before the child is launched are returned as errors; once
/// it runs, every problem is logged and reflected in the summary so that
/// directory restoration always happens.
pub async fn run_session(options: SessionOptions) -> Result<SessionSummary, SessionError> {
    // Installed before the directories move: from here on SIGINT no longer
    // kills the wrapper outright.
    let interrupt = interrupt_signal();
    run_session_until(options, interrupt).await
}

/// [`run_session`] with the interrupt supplied by the caller. Once
/// `shutdown` completes, the child is stopped and the session drains.
pub async fn run_session_until<S>(
    options: SessionOptions,
    shutdown: S,
) -> Result<SessionSummary, SessionError>
where
    S: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let SessionOptions {
        settings,
        layout,
        command,
    } = options;

    tracing::info!(phase = ?SessionPhase::Starting, "session starting");
    let active = redirect::enter(&layout)?;
    let ctx = SyncContext::new(&settings, active.saves_dir(), active.store_dir())?;

    let mut game = match GameProcess::spawn(&command) {
        Ok(game) => game,
        Err(err) => {
            if let Err(restore) = active.exit() {
                tracing::error!(error = %restore, "{}", redirect::recovery_instructions(&layout));
            }
            return Err(err);
        }
    };

    let mut sync_loop = SyncLoop::new(Arc::new(ctx), &settings);
    let stop = sync_loop.supervise(&mut game, shutdown).await;

    sync_loop.set_phase(SessionPhase::Draining);
    tracing::info!(stop = ?stop, "child finished; running final sync");
    sync_loop.cycle(true).await;

    let restore_failed = match active.exit() {
        Ok(()) => false,
        Err(err) => {
            tracing::error!(error = %err, "{}", redirect::recovery_instructions(&layout));
            true
        }
    };
    sync_loop.set_phase(SessionPhase::Stopped);

    let summary = SessionSummary {
        stop,
        cycles: sync_loop.cycles(),
        interrupted: sync_loop.interrupted,
        sync_failed: sync_loop.sync_failed,
        restore_failed,
    };
    tracing::info!(
        cycles = summary.cycles,
        sync_failed = summary.sync_failed,
        restore_failed = summary.restore_failed,
        exit_code = summary.exit_code(),
        "session finished"
    );
    Ok(summary)
}

// ---------------------------------------------------------------------------
// Sync loop
// ---------------------------------------------------------------------------

/// Owns the session state between blocking sync passes.
struct SyncLoop {
    ctx: Arc<SyncContext>,
    /// `None` once a blocking pass panicked; syncing stops for the session.
    state: Option<SessionState>,
    phase: SessionPhase,
    poll_interval: Duration,
    scan_interval: Duration,
    terminate_grace: Duration,
    kill_grace: Duration,
    interrupted: bool,
    sync_failed: bool,
}

impl SyncLoop {
    fn new(ctx: Arc<SyncContext>, settings: &Settings) -> Self {
        Self {
            ctx,
            state: Some(SessionState::default()),
            phase: SessionPhase::Starting,
            poll_interval: settings.poll_interval(),
            scan_interval: settings.scan_interval(),
            terminate_grace: settings.terminate_grace(),
            kill_grace: settings.kill_grace(),
            interrupted: false,
            sync_failed: false,
        }
    }

    fn set_phase(&mut self, phase: SessionPhase) {
        tracing::debug!(from = ?self.phase, to = ?phase, "session phase");
        self.phase = phase;
    }

    fn cycles(&self) -> u64 {
        self.state.as_ref().map_or(0, |state| state.cycles)
    }

    /// Starting and Running: resync, then tick until the child is gone or
    /// `shutdown` fires.
    async fn supervise<S>(
        &mut self,
        game: &mut GameProcess,
        mut shutdown: Pin<&mut S>,
    ) -> StopOutcome
    where
        S: Future<Output = ()>,
    {
        let (grace, kill_grace) = (self.terminate_grace, self.kill_grace);
        // A blocking pass cannot be abandoned; stop the child and let it finish.
        let early_stop = {
            let resync = self.resync();
            tokio::pin!(resync);
            tokio::select! {
                () = &mut resync => None,
                () = shutdown.as_mut() => {
                    tracing::info!("received ctrl-c during resync, stopping child");
                    let stop = game.terminate(grace, kill_grace).await;
                    resync.await;
                    Some(stop)
                }
            }
        };
        if let Some(stop) = early_stop {
            self.interrupted = true;
            return stop;
        }
        self.set_phase(SessionPhase::Running);

        let mut poll = interval(self.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut scan = interval_at(Instant::now() + self.scan_interval, self.scan_interval);
        scan.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = poll.tick() => match game.try_exit() {
                    Ok(Some(status)) => {
                        tracing::info!(status = %status, "child exited");
                        return StopOutcome::Stopped(status);
                    }
                    Ok(None) => {}
                    Err(err) => {
                        tracing::error!(error = %err, "lost track of child; stopping it");
                        return game.terminate(grace, kill_grace).await;
                    }
                },
                _ = scan.tick() => self.cycle(false).await,
                () = shutdown.as_mut() => {
                    tracing::info!("received ctrl-c, stopping child");
                    self.interrupted = true;
                    return game.terminate(grace, kill_grace).await;
                }
            }
        }
    }

    async fn resync(&mut self) {
        match self.run_blocking("resync", resync).await {
            Some(Ok(report)) => log_resync(&report),
            Some(Err(err)) => {
                tracing::error!(error = %err, "initial resync failed");
                self.sync_failed = true;
            }
            None => {}
        }
    }

    async fn cycle(&mut self, last: bool) {
        match self.run_blocking("sync cycle", run_cycle).await {
            Some(Ok(report)) => {
                log_cycle(&report);
                if last && !report.failures.is_empty() {
                    self.sync_failed = true;
                }
            }
            Some(Err(err)) => {
                tracing::error!(error = %err, "sync cycle failed");
                self.sync_failed = true;
            }
            None => {}
        }
    }

    /// Move the state into a blocking task and back out again.
    async fn run_blocking<R, F>(&mut self, task: &'static str, f: F) -> Option<Result<R, SyncError>>
    where
        R: Send + 'static,
        F: FnOnce(&SyncContext, &mut SessionState) -> Result<R, SyncError> + Send + 'static,
    {
        let mut state = self.state.take()?;
        let ctx = Arc::clone(&self.ctx);
        let joined = tokio::task::spawn_blocking(move || {
            let result = f(&ctx, &mut state);
            (state, result)
        })
        .await;

        match joined {
            Ok((state, result)) => {
                self.state = Some(state);
                Some(result)
            }
            Err(source) => {
                let err = SessionError::Join { task, source };
                tracing::error!(error = %err, "sync disabled for the rest of the session");
                self.sync_failed = true;
                None
            }
        }
    }
}

/// Resolves on the first SIGINT (Ctrl-C). The handler is registered when
/// this is called, not when the future is first polled.
fn interrupt_signal() -> Pin<Box<dyn Future<Output = ()>>> {
    #[cfg(unix)]
    let registered = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt());
    #[cfg(windows)]
    let registered = tokio::signal::windows::ctrl_c();

    match registered {
        Ok(mut signal) => Box::pin(async move {
            if signal.recv().await.is_none() {
                pending::<()>().await;
            }
        }),
        Err(err) => {
            tracing::warn!(error = %err, "ctrl-c handler unavailable");
            Box::pin(pending())
        }
    }
}

fn log_resync(report: &ResyncReport) {
    tracing::info!(
        fragment_sets = report.discovered,
        pruned = report.pruned.len(),
        restored = report.restored.len(),
        "initial resync complete"
    );
    log_failures("resync", &report.failures);
    log_cycle(&report.cycle);
}

fn log_cycle(report: &CycleReport) {
    if report.is_quiet() {
        tracing::trace!("sync cycle: no changes");
        return;
    }
    tracing::info!(
        promoted = report.promoted.len(),
        expired = report.expired.len(),
        removed = report.removed.len(),
        written = report.written.len(),
        skipped = report.skipped.len(),
        failures = report.failures.len(),
        "sync cycle"
    );
    log_failures("sync cycle", &report.failures);
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Install the stderr subscriber, plus an ANSI-free file layer for the
/// session log when a layout is given.
pub fn init_tracing(layout: Option<&Layout>) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let file_layer = layout.and_then(open_session_log).map(|file| {
        fmt::layer()
            .with_ansi(false)
            .with_target(false)
            .with_writer(Mutex::new(file))
    });

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(file_layer)
        .try_init();
}

fn open_session_log(layout: &Layout) -> Option<std::fs::File> {
    let opened = ensure_dir(&logs_dir(layout)).and_then(|()| {
        rotate_session_log(&layout.log_file);
        append(&layout.log_file)
    });
    match opened {
        Ok(file) => Some(file),
        Err(err) => {
            eprintln!("cloudsaver: logging to stderr only: {err}");
            None
        }
    }
}

fn append(path: &Path) -> Result<std::fs::File, SessionError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| io_err(path, e))
}
