//! Owns the lifecycle of one stream session: output area, ffmpeg child,
//! diagnostic reader and HTTP publisher.
//!
//! Every state change happens with `inner` locked. Background failures
//! (process exit, publisher timeout) carry the id of the session they belong
//! to, so a late signal from an already torn-down session is ignored and only
//! one cleanup pass ever runs per session.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use hlsbridge_core::error::SessionError;
use hlsbridge_core::types::{DiagnosticEvent, SessionConfig, SessionEvent, SessionState};
use hlsbridge_transcoder::TranscoderConfig;
use hlsbridge_transcoder::area::OutputArea;
use hlsbridge_transcoder::diagnostics;
use hlsbridge_transcoder::launcher::{Launcher, TranscodeProcess};
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::advertise::ServiceAdvertiser;
use crate::error::PublishError;
use crate::publisher::{PublishPhase, Publisher, PublisherSettings, StopReason};

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Default)]
pub struct CoordinatorSettings {
    pub transcoder: TranscoderConfig,
    pub publisher: PublisherSettings,
}

#[derive(Default)]
struct Active {
    /// Id of the live session, `None` when nothing is running.
    session_id: Option<u64>,
    next_id: u64,
    process: Option<TranscodeProcess>,
    publisher: Option<Publisher>,
    area: Option<OutputArea>,
}

type StateObserver = Arc<dyn Fn(&SessionState) + Send + Sync>;

struct Shared {
    launcher: Launcher,
    publisher_settings: PublisherSettings,
    advertiser: Option<Arc<dyn ServiceAdvertiser>>,
    inner: Mutex<Active>,
    state: watch::Sender<SessionState>,
    observers: std::sync::Mutex<Vec<StateObserver>>,
    events: broadcast::Sender<SessionEvent>,
}

/// Cloneable handle to the session supervisor.
#[derive(Clone)]
pub struct SessionCoordinator {
    shared: Arc<Shared>,
}

impl SessionCoordinator {
    pub fn new(settings: CoordinatorSettings) -> Self {
        Self::build(settings, None)
    }

    /// Like [`SessionCoordinator::new`], announcing every publisher through `advertiser`.
    pub fn with_advertiser(
        settings: CoordinatorSettings,
        advertiser: Arc<dyn ServiceAdvertiser>,
    ) -> Self {
        Self::build(settings, Some(advertiser))
    }

    fn build(
        settings: CoordinatorSettings,
        advertiser: Option<Arc<dyn ServiceAdvertiser>>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                launcher: Launcher::new(settings.transcoder),
                publisher_settings: settings.publisher,
                advertiser,
                inner: Mutex::new(Active::default()),
                state: watch::Sender::new(SessionState::Idle),
                observers: std::sync::Mutex::new(Vec::new()),
                events,
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        self.shared.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// Diagnostics, state changes and error reports, in emission order.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    /// Call `callback` with every state the coordinator moves into, in order.
    ///
    /// Callbacks run synchronously on the task making the change, so they
    /// must not block.
    pub fn on_state_change<F>(&self, callback: F)
    where
        F: Fn(&SessionState) + Send + Sync + 'static,
    {
        self.shared
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(callback));
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.shared
            .inner
            .lock()
            .await
            .publisher
            .as_ref()
            .map(Publisher::local_addr)
    }

    pub async fn process_id(&self) -> Option<u32> {
        self.shared
            .inner
            .lock()
            .await
            .process
            .as_ref()
            .and_then(TranscodeProcess::pid)
    }

    pub async fn output_dir(&self) -> Option<PathBuf> {
        self.shared
            .inner
            .lock()
            .await
            .area
            .as_ref()
            .map(|a| a.dir().to_path_buf())
    }

    /// Start a session for `config`, stopping any session that is already live.
    ///
    /// Ends either `Running` or cleaned up in `Failed`.
    pub async fn start_session(&self, config: SessionConfig) -> Result<(), SessionError> {
        let mut active = self.shared.inner.lock().await;

        if active.session_id.is_some() {
            info!("session already active, restarting");
            self.shared.teardown(&mut active, SessionState::Idle).await;
        }

        let id = active.next_id;
        active.next_id += 1;
        active.session_id = Some(id);
        self.shared.set_state(SessionState::Starting);
        info!(session = id, stream = %config.stream_name, port = config.port, "starting session");

        match self.start_parts(&mut active, id, &config).await {
            Ok(()) => {
                self.shared.set_state(SessionState::Running);
                info!(session = id, "session running");
                Ok(())
            }
            Err(e) => {
                self.shared.fail(&mut active, &e).await;
                Err(e)
            }
        }
    }

    async fn start_parts(
        &self,
        active: &mut Active,
        id: u64,
        config: &SessionConfig,
    ) -> Result<(), SessionError> {
        if config.needs_output_area() {
            let root = &self.shared.launcher.config().output_root;
            active.area = Some(OutputArea::create(root, &config.temp_dir_name)?);
        }

        let mut process = self.shared.launcher.start(config, active.area.as_ref())?;
        if let Some(stderr) = process.take_stderr() {
            let (tx, rx) = mpsc::unbounded_channel();
            diagnostics::attach(stderr, tx);
            tokio::spawn(consume_diagnostics(self.shared.clone(), id, rx));
        }
        active.process = Some(process);

        if config.use_http_server {
            if let Some(area) = active.area.as_ref() {
                let publisher = Publisher::start(
                    area,
                    config.port,
                    &config.stream_name,
                    self.shared.publisher_settings.clone(),
                    self.shared.advertiser.clone(),
                )
                .await?;
                tokio::spawn(watch_publisher(
                    self.shared.clone(),
                    id,
                    publisher.subscribe_phase(),
                    self.shared.publisher_settings.startup_timeout,
                ));
                active.publisher = Some(publisher);
            }
        }

        Ok(())
    }

    /// Stop whatever is running and return to `Idle`.
    pub async fn stop_session(&self) {
        let mut active = self.shared.inner.lock().await;
        if active.session_id.is_none() && active.process.is_none() && active.publisher.is_none() {
            // Nothing to tear down; clears a leftover Failed state
            let idle = matches!(*self.shared.state.borrow(), SessionState::Idle);
            if !idle {
                self.shared.set_state(SessionState::Idle);
            }
            return;
        }
        self.shared.teardown(&mut active, SessionState::Idle).await;
    }
}

impl Shared {
    fn set_state(&self, state: SessionState) {
        debug!(%state, "session state");
        self.state.send_replace(state.clone());

        let observers = self
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for observer in &observers {
            observer(&state);
        }

        let _ = self.events.send(SessionEvent::StateChanged { state });
    }

    /// Terminate the child, stop the publisher, delete the output area.
    async fn teardown(&self, active: &mut Active, end_state: SessionState) {
        let id = active.session_id.take();
        self.set_state(SessionState::Stopping);

        if let Some(process) = active.process.take() {
            process.terminate().await;
        }
        if let Some(publisher) = active.publisher.take() {
            publisher.stop().await;
        }
        if let Some(area) = active.area.take() {
            let dir = area.dir().to_path_buf();
            if let Err(e) = area.remove().await {
                warn!(dir = %dir.display(), error = %e, "failed to remove output area");
            }
        }

        info!(session = ?id, state = %end_state, "session stopped");
        self.set_state(end_state);
    }

    async fn fail(&self, active: &mut Active, err: &SessionError) {
        error!(code = err.code(), error = %err, "session failed");
        self.teardown(active, SessionState::Failed(err.code().to_string()))
            .await;
        let _ = self.events.send(SessionEvent::Error {
            report: err.report(),
        });
    }

    /// Entry point for failures noticed by background tasks.
    async fn fail_from_background(&self, id: u64, err: SessionError) {
        let mut active = self.inner.lock().await;
        if active.session_id != Some(id) {
            debug!(session = id, error = %err, "ignoring failure from a finished session");
            return;
        }
        self.fail(&mut active, &err).await;
    }
}

/// Single consumer of one session's diagnostics, so delivery is serialized.
async fn consume_diagnostics(
    shared: Arc<Shared>,
    id: u64,
    mut rx: mpsc::UnboundedReceiver<DiagnosticEvent>,
) {
    while let Some(event) = rx.recv().await {
        match event {
            DiagnosticEvent::TextChunk(text) => {
                debug!(target: "hlsbridge::ffmpeg", session = id, "{}", text.trim_end());
                let _ = shared.events.send(SessionEvent::Diagnostic { text });
            }
            DiagnosticEvent::ProcessExited => {
                let mut active = shared.inner.lock().await;
                if active.session_id != Some(id) {
                    return;
                }
                // Reap first so the report can carry the exit code
                let code = match active.process.take() {
                    Some(process) => process.terminate().await,
                    None => None,
                };
                shared
                    .fail(&mut active, &SessionError::ProcessExitedUnexpectedly(code))
                    .await;
                return;
            }
        }
    }
}

async fn watch_publisher(
    shared: Arc<Shared>,
    id: u64,
    mut phase: watch::Receiver<PublishPhase>,
    timeout: Duration,
) {
    let timed_out = phase
        .wait_for(|p| matches!(p, PublishPhase::Stopped(_)))
        .await
        .map(|p| *p == PublishPhase::Stopped(StopReason::StartupTimeout))
        .unwrap_or(false);
    if timed_out {
        shared
            .fail_from_background(id, PublishError::StartupTimeout(timeout).into())
            .await;
    }
}
