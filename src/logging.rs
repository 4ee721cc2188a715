//! Process-wide log subscriber.

use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber filtered at `level` (e.g. `"info"`,
/// `"climagg=debug"`). `RUST_LOG`, when set, takes precedence. Calling this
/// again after a subscriber is installed does nothing.
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    #[test]
    fn init_twice_is_harmless() {
        super::init("debug");
        super::init("not a = valid filter");
        tracing::info!("[logging] still alive");
    }
}
