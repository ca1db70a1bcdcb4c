use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub struct Logger;

impl Logger {
    /// Install the global subscriber. `RUST_LOG` wins over the verbosity flag.
    pub fn init(verbose: bool) {
        tracing_subscriber::registry()
            .with(
                EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| Self::default_directive(verbose).into()),
            )
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init();
    }

    fn default_directive(verbose: bool) -> &'static str {
        if verbose {
            "debug"
        } else {
            "info"
        }
    }
}
