//! Subtide: ASS subtitle translation through a remote language model, with
//! markup preservation, a similarity translation memory and chunked,
//! cancellable runs.

pub mod ass;
pub mod cancellation;
pub mod config;
pub mod metrics;
pub mod orchestrator;
pub mod pipeline;
pub mod progress;
pub mod quality;
pub mod state_machine;
pub mod translate;

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// `subtide=info` filter; `json` switches to one JSON object per event.
pub fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("subtide=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
