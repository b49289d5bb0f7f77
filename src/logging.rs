use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Installs the global fmt subscriber.
///
/// Debug builds show up to INFO by default, release builds only WARN and
/// ERROR. `RUST_LOG` overrides either.
pub fn init() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let default_level = if cfg!(debug_assertions) {
        LevelFilter::INFO
    } else {
        LevelFilter::WARN
    };
    let filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_line_number(true)
        .with_file(true)
        .with_thread_ids(true)
        .with_env_filter(filter)
        .try_init()
}
