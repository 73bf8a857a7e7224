use liasis::{cli, config, telemetry};

fn main() {
    let cli = cli::parse_from(std::env::args_os());
    let _telemetry_guard = init_tracing(&cli);

    if let Err(err) = cli::run(cli) {
        tracing::error!("error: {err}");
        eprintln!("liasis: {err}");
        std::process::exit(err.exit_code());
    }
}

fn init_tracing(cli: &cli::Cli) -> telemetry::TelemetryGuard {
    // Config problems are reported by the command itself; telemetry falls
    // back to defaults so the error is visible.
    let logging = config::load(cli.config.as_deref())
        .map(|config| config.logging)
        .unwrap_or_default();
    telemetry::init(cli.verbose, &logging)
}
