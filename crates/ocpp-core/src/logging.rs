//! Tracing subscriber setup.

/// Initialize the global tracing subscriber with stderr output.
///
/// `level` applies to the OCPP crates only; everything else, the
/// transport library included, stays at `warn` so frame-level chatter
/// doesn't drown the protocol log. A `RUST_LOG` value overrides the whole
/// policy. Call once at application startup; subsequent calls are no-ops.
pub fn init_subscriber(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact();

    let _ = subscriber.try_init();
}

/// Per-crate filter directives: `level` for the engine, `warn` elsewhere.
fn default_directives(level: &str) -> String {
    format!("warn,ocpp_core={level},ocpp_ws={level}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::EnvFilter;

    #[test]
    fn directives_scope_level_to_the_ocpp_crates() {
        assert_eq!(
            default_directives("debug"),
            "warn,ocpp_core=debug,ocpp_ws=debug"
        );
    }

    #[test]
    fn directives_parse_as_a_filter() {
        assert!(EnvFilter::try_new(default_directives("trace")).is_ok());
    }

    #[test]
    fn init_subscriber_is_idempotent() {
        init_subscriber("warn");
        init_subscriber("debug");
    }
}
