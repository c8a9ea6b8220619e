//! Logging and error tracking bootstrap for hosts of the client.

use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::ClientConfig;

/// Initialize Sentry (when a DSN is configured) and the tracing subscriber.
///
/// The returned guard flushes pending Sentry events on drop and must be kept
/// alive for the lifetime of the process. `default_filter` applies when
/// `RUST_LOG` is unset, e.g. `"storefront_sync=info"`.
pub fn init(config: &ClientConfig, default_filter: &str) -> Option<sentry::ClientInitGuard> {
    // Sentry must be initialized before the subscriber
    let guard = init_sentry(config);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    let result = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .try_init();

    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
    if guard.is_some() {
        tracing::info!("Sentry initialized");
    }
    guard
}

fn init_sentry(config: &ClientConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    Some(sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: config
                .sentry_environment
                .clone()
                .map(std::borrow::Cow::Owned),
            sample_rate: config.sentry_sample_rate,
            attach_stacktrace: true,
            ..Default::default()
        },
    )))
}

/// Warnings and errors become Sentry events; info and debug become breadcrumbs.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}
