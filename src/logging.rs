use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber, writing to stderr.
///
/// `RUST_LOG` wins over `level`; `verbose` forces debug output regardless.
pub fn init(level: &str, verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(level))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    };

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
