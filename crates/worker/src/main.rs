use std::process::ExitCode;

use tasklane_infra::WorkerConfig;

#[tokio::main]
async fn main() -> ExitCode {
    tasklane_observability::init();

    std::panic::set_hook(Box::new(|info| {
        tracing::error!(panic = %info, "worker panicked");
        std::process::exit(1);
    }));

    let config = match WorkerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    match tasklane_worker::app::run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "worker failed");
            ExitCode::FAILURE
        }
    }
}
