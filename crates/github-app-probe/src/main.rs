use github_app_probe::run_cli;
use tracing::error;

#[tokio::main]
async fn main() {
    if let Err(e) = run_cli().await {
        error!(error = %e, "Probe run aborted");
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}
