use std::env;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{Layer, filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the process-wide tracing subscriber.
///
/// Log verbosity comes from `RUST_LOG` (default `info`). Setting
/// `RUST_LOG_FORMAT=json` switches to line-delimited JSON output for
/// log shippers; anything else gets the compact human format.
pub fn init() {
    let env_filter =
        EnvFilter::builder().with_default_directive(LevelFilter::INFO.into()).from_env_lossy();

    let layer = match env::var("RUST_LOG_FORMAT").as_deref() {
        Ok("json") => tracing_subscriber::fmt::layer().json().with_filter(env_filter).boxed(),
        _ => tracing_subscriber::fmt::layer().compact().with_filter(env_filter).boxed(),
    };

    tracing_subscriber::registry().with(layer).init();
}
