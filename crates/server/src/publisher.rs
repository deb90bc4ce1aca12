//! HTTP publisher for an output area.
//!
//! Until ffmpeg has written its first segment there is nothing worth serving,
//! so every request gets a small self-refreshing placeholder page. As soon as
//! the output directory holds more than the index, the publisher switches to
//! serving files from it, and stays that way until stopped.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, Uri, header};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use hlsbridge_core::error::ApiError;
use hlsbridge_transcoder::area::{OutputArea, count_entries};
use hlsbridge_transcoder::hls;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::advertise::ServiceAdvertiser;
use crate::error::{AppError, PublishError};
use crate::streaming;

/// Asset the placeholder page shows while waiting.
pub const THROBBER_PATH: &str = "/throbber.gif";

/// 1x1 transparent GIF.
pub const THROBBER_GIF: &[u8] = &[
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00,
    0x00, 0xff, 0xff, 0xff, 0x21, 0xf9, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2c, 0x00, 0x00,
    0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x02, 0x02, 0x44, 0x01, 0x00, 0x3b,
];

/// How long `stop` waits for in-flight requests before dropping the listener.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

#[derive(Debug, Clone)]
pub struct PublisherSettings {
    /// Give up if no segment shows up within this long.
    pub startup_timeout: Duration,
    /// Refresh delay advertised by the placeholder page.
    pub reload_delay: Duration,
    /// How often the output directory is checked while waiting.
    pub poll_interval: Duration,
    /// `Cache-Control: max-age` for segments.
    pub cache_max_age_secs: u64,
}

impl Default for PublisherSettings {
    fn default() -> Self {
        Self {
            startup_timeout: Duration::from_secs(10),
            reload_delay: Duration::from_secs(1),
            poll_interval: Duration::from_millis(250),
            cache_max_age_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Requested,
    StartupTimeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishPhase {
    NotStarted,
    AwaitingFirstSegment,
    Publishing,
    Stopped(StopReason),
}

/// Shared between the request handler and the startup watchdog.
pub struct PublisherState {
    root: PathBuf,
    index_name: String,
    stream_name: String,
    settings: PublisherSettings,
    phase: watch::Sender<PublishPhase>,
    startup_timer: CancellationToken,
}

impl PublisherState {
    pub fn new(
        root: &Path,
        index_name: &str,
        stream_name: &str,
        settings: PublisherSettings,
    ) -> Self {
        Self {
            root: root.to_path_buf(),
            index_name: index_name.to_string(),
            stream_name: stream_name.to_string(),
            settings,
            phase: watch::Sender::new(PublishPhase::NotStarted),
            startup_timer: CancellationToken::new(),
        }
    }

    pub fn phase(&self) -> PublishPhase {
        *self.phase.borrow()
    }

    /// Move `from → to` atomically; false if the phase was not `from`.
    fn transition(&self, from: PublishPhase, to: PublishPhase) -> bool {
        self.phase.send_if_modified(|phase| {
            if *phase == from {
                *phase = to;
                true
            } else {
                false
            }
        })
    }

    /// Switch to serving the output once segments exist. Happens at most once.
    async fn try_begin_publishing(&self) -> bool {
        match self.phase() {
            PublishPhase::Publishing => return true,
            PublishPhase::AwaitingFirstSegment => {}
            _ => return false,
        }
        if count_entries(&self.root).await <= 1 {
            return false;
        }
        if self.transition(PublishPhase::AwaitingFirstSegment, PublishPhase::Publishing) {
            self.startup_timer.cancel();
            info!(stream = %self.stream_name, dir = %self.root.display(), "first segments ready, publishing");
        }
        self.phase() == PublishPhase::Publishing
    }

    fn placeholder(&self) -> Response {
        (
            [(header::CACHE_CONTROL, "no-cache")],
            Html(placeholder_page(&self.stream_name, self.settings.reload_delay)),
        )
            .into_response()
    }
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Black page with a centered throbber that reloads `/` after `reload`.
pub fn placeholder_page(stream_name: &str, reload: Duration) -> String {
    format!(
        concat!(
            "<html><head><title>{title}</title>",
            "<meta http-equiv=\"refresh\" content=\"{delay}; URL=/\"></head>",
            "<body style=\"background-color:black\">",
            "<img src=\"throbber.gif\" alt=\"Loading\" style=\"display:block;position:absolute;",
            "top:50%;left:50%;margin-left:-16px;margin-top:-16px\" />",
            "</body></html>"
        ),
        title = escape_html(stream_name),
        delay = reload.as_secs_f32(),
    )
}

pub fn build_router(state: Arc<PublisherState>) -> Router {
    Router::new()
        .route("/", get(handle))
        .route("/{*path}", get(handle))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}

async fn handle(
    State(state): State<Arc<PublisherState>>,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let path = uri.path();

    if state.phase() != PublishPhase::Publishing {
        if path == THROBBER_PATH {
            return Ok(([(header::CONTENT_TYPE, "image/gif")], THROBBER_GIF).into_response());
        }
        if !state.try_begin_publishing().await {
            return Ok(state.placeholder());
        }
    }

    serve_output(&state, path, &headers).await
}

async fn serve_output(
    state: &PublisherState,
    path: &str,
    headers: &HeaderMap,
) -> Result<Response, AppError> {
    let name = match path.trim_start_matches('/') {
        "" => state.index_name.as_str(),
        name => name,
    };

    // Output areas are flat; anything else is traversal
    if name.contains("..") || name.contains('/') || name.contains('\\') {
        return Err(ApiError::BadRequest("invalid filename".into()).into());
    }

    let cache_control = if hls::is_playlist(name) {
        "no-cache".to_string()
    } else {
        format!("max-age={}", state.settings.cache_max_age_secs)
    };

    streaming::serve_file(
        &state.root.join(name),
        hls::content_type_for(name),
        &cache_control,
        headers,
    )
    .await
}

/// Poll the output directory until segments appear or the deadline passes.
async fn watch_startup(state: Arc<PublisherState>, shutdown: CancellationToken) {
    let deadline = tokio::time::Instant::now() + state.settings.startup_timeout;
    let mut ticker = tokio::time::interval(state.settings.poll_interval);
    loop {
        tokio::select! {
            _ = state.startup_timer.cancelled() => return,
            _ = tokio::time::sleep_until(deadline) => {
                if state.transition(
                    PublishPhase::AwaitingFirstSegment,
                    PublishPhase::Stopped(StopReason::StartupTimeout),
                ) {
                    warn!(
                        stream = %state.stream_name,
                        timeout_secs = state.settings.startup_timeout.as_secs(),
                        "no output before startup timeout, stopping publisher"
                    );
                    shutdown.cancel();
                }
                return;
            }
            _ = ticker.tick() => {
                if state.try_begin_publishing().await {
                    return;
                }
            }
        }
    }
}

/// A running HTTP listener serving one output area.
pub struct Publisher {
    state: Arc<PublisherState>,
    shutdown: CancellationToken,
    server_task: Option<JoinHandle<()>>,
    local_addr: SocketAddr,
    advertisement: Option<Advertisement>,
}

struct Advertisement {
    advertiser: Arc<dyn ServiceAdvertiser>,
    registration: String,
}

impl Advertisement {
    fn withdraw(self) {
        self.advertiser.withdraw(&self.registration);
    }
}

impl Publisher {
    /// Bind `port` on all interfaces and start serving `area`.
    /// Port 0 picks a free port; see [`Publisher::local_addr`].
    ///
    /// With an `advertiser`, the listener is announced under `name` as well.
    /// A failed announcement is logged and does not stop the publisher.
    pub async fn start(
        area: &OutputArea,
        port: u16,
        name: &str,
        settings: PublisherSettings,
        advertiser: Option<Arc<dyn ServiceAdvertiser>>,
    ) -> Result<Self, PublishError> {
        let bind_failed = |e: std::io::Error| PublishError::BindFailed {
            port,
            reason: e.to_string(),
        };
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .map_err(bind_failed)?;
        let local_addr = listener.local_addr().map_err(bind_failed)?;

        let state = Arc::new(PublisherState::new(area.dir(), area.index_name(), name, settings));
        state.transition(PublishPhase::NotStarted, PublishPhase::AwaitingFirstSegment);

        let shutdown = CancellationToken::new();
        let app = build_router(state.clone());
        let server_task = tokio::spawn({
            let shutdown = shutdown.clone();
            async move {
                if let Err(e) = axum::serve(listener, app)
                    .with_graceful_shutdown(shutdown.cancelled_owned())
                    .await
                {
                    warn!(error = %e, "publisher listener failed");
                }
            }
        });
        tokio::spawn(watch_startup(state.clone(), shutdown.clone()));

        info!(stream = %name, addr = %local_addr, dir = %area.dir().display(), "publisher listening");

        let advertisement = advertiser.and_then(|advertiser| {
            match advertiser.advertise(name, local_addr.port()) {
                Ok(registration) => Some(Advertisement {
                    advertiser,
                    registration,
                }),
                Err(e) => {
                    warn!(stream = %name, error = %e, "could not advertise publisher");
                    None
                }
            }
        });

        Ok(Self {
            state,
            shutdown,
            server_task: Some(server_task),
            local_addr,
            advertisement,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn phase(&self) -> PublishPhase {
        self.state.phase()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<PublishPhase> {
        self.state.phase.subscribe()
    }

    /// Stop serving and release the port. Safe after a timeout already stopped it.
    pub async fn stop(mut self) {
        if let Some(advertisement) = self.advertisement.take() {
            advertisement.withdraw();
        }
        self.state.startup_timer.cancel();
        self.state.phase.send_if_modified(|phase| {
            if matches!(phase, PublishPhase::Stopped(_)) {
                false
            } else {
                *phase = PublishPhase::Stopped(StopReason::Requested);
                true
            }
        });
        self.shutdown.cancel();

        if let Some(mut task) = self.server_task.take() {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
                warn!(addr = %self.local_addr, "publisher did not drain in time, aborting");
                task.abort();
                let _ = task.await;
            }
        }
        info!(addr = %self.local_addr, "publisher stopped");
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        if let Some(advertisement) = self.advertisement.take() {
            advertisement.withdraw();
        }
        self.state.startup_timer.cancel();
        self.shutdown.cancel();
    }
}
