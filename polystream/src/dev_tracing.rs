/// Development helper: initialize tracing subscriber when `RUST_LOG` is set.
///
/// Benches and tests can call `polystream::dev_tracing::init_tracing()` to get
/// the `[SCTP]` / `[REGISTRY]` / `[DESCRIPTOR]` logs while debugging. This is
/// a no-op when `RUST_LOG` is not set or a global subscriber already exists.
pub fn init_tracing() {
    if std::env::var_os("RUST_LOG").is_none() {
        return;
    }
    let installed = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_thread_names(true)
        .with_test_writer()
        .try_init()
        .is_ok();
    if installed {
        tracing::debug!("[TRACING] subscriber installed from RUST_LOG");
    }
}
