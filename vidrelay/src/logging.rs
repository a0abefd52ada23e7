use tracing_subscriber::EnvFilter;

/**
    Install the process-wide log subscriber.

    `RUST_LOG` takes precedence over `default_filter`. Only the first call
    in a process installs anything, so hosts that bring their own
    subscriber can skip this entirely.
*/
pub fn init(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_is_harmless() {
        init("vidrelay=debug");
        init("vidrelay=info");
        tracing::info!("logging initialized");
    }
}
