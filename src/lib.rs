pub mod capture;
pub mod cli;
pub mod config;
pub mod controller;
pub mod error;
pub mod metrics;
pub mod packet;
pub mod queue;
pub mod regression;
pub mod reporters;
pub mod runloop;
pub mod traffic;
pub mod workers;

/// Installs the panic hook and initializes `tracing_subscriber`. `debug` raises the
/// default filter from `info` to `debug` (and enables per-packet hex dumps elsewhere).
pub fn init_logging(debug: bool) {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        tracing::error!("panic in flowgate: {info}");
        default_hook(info);
    }));

    let default_filter = if debug { "flowgate=debug" } else { "flowgate=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()),
        )
        .init();
}
