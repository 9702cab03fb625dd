use tracing_subscriber::{filter::LevelFilter, EnvFilter};

/// `RUST_LOG` wins over `--verbose`; without either only warnings are shown.
pub(crate) fn init_tracing(verbose: bool) {
    let default_level = if verbose {
        LevelFilter::INFO
    } else {
        LevelFilter::WARN
    };
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}
