use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use hlsbridge_core::prefs::{JsonFilePrefs, PrefsStore};
use hlsbridge_core::types::{SessionEvent, SessionState};
use hlsbridge_core::uri;
use hlsbridge_server::advertise::MdnsAdvertiser;
use hlsbridge_server::coordinator::{CoordinatorSettings, SessionCoordinator};
use hlsbridge_server::publisher::PublisherSettings;
use hlsbridge_transcoder::TranscoderConfig;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // Preferences file: use HLSBRIDGE_PREFS env or default
    let prefs_path =
        std::env::var("HLSBRIDGE_PREFS").unwrap_or_else(|_| "hlsbridge.json".to_string());
    let store = JsonFilePrefs::new(&prefs_path);
    let prefs = store
        .load()
        .with_context(|| format!("failed to load preferences from {prefs_path}"))?;
    info!(prefs = %prefs_path, source = %uri::redacted(&prefs.input_uri), "preferences loaded");

    // Transcoder config
    let output_root = std::env::var("HLSBRIDGE_OUTPUT_ROOT")
        .map(Into::into)
        .unwrap_or_else(|_| std::env::temp_dir());
    let ffmpeg_path = std::env::var("HLSBRIDGE_FFMPEG").ok().map(Into::into);
    let startup_timeout_secs: u64 = std::env::var("HLSBRIDGE_STARTUP_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(10);

    let settings = CoordinatorSettings {
        transcoder: TranscoderConfig {
            ffmpeg_path,
            output_root,
            ..Default::default()
        },
        publisher: PublisherSettings {
            startup_timeout: Duration::from_secs(startup_timeout_secs),
            ..Default::default()
        },
    };
    // Announce the publisher over mDNS unless HLSBRIDGE_MDNS=0
    let advertise = std::env::var("HLSBRIDGE_MDNS")
        .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
        .unwrap_or(true);
    let coordinator = match advertise.then(MdnsAdvertiser::new) {
        Some(Ok(advertiser)) => SessionCoordinator::with_advertiser(settings, Arc::new(advertiser)),
        Some(Err(e)) => {
            warn!(error = %e, "mdns unavailable, stream will not be advertised");
            SessionCoordinator::new(settings)
        }
        None => SessionCoordinator::new(settings),
    };

    // Event logger: ffmpeg console text, state changes, error reports
    {
        let mut events = coordinator.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(SessionEvent::Diagnostic { text }) => {
                        info!(target: "hlsbridge::ffmpeg", "{}", text.trim_end());
                    }
                    Ok(SessionEvent::StateChanged { state }) => info!(%state, "session state"),
                    Ok(SessionEvent::Error { report }) => {
                        error!(code = %report.code, header = %report.header, "{}", report.message);
                    }
                    Err(RecvError::Lagged(n)) => warn!(skipped = n, "event logger lagged"),
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }

    let config = prefs.session_config();
    coordinator
        .start_session(config)
        .await
        .context("failed to start stream session")?;

    if let Some(addr) = coordinator.local_addr().await {
        info!(%addr, stream = %prefs.stream_name, "serving HLS stream");
    }

    let mut state = coordinator.watch_state();
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res.context("failed to listen for ctrl-c")?;
            info!("shutdown requested");
        }
        res = state.wait_for(|s| !s.is_active()) => {
            if res.is_ok() {
                warn!("session ended on its own");
            }
        }
    }

    let final_state = coordinator.state();
    coordinator.stop_session().await;

    if let SessionState::Failed(reason) = final_state {
        anyhow::bail!("stream session failed: {reason}");
    }
    Ok(())
}
