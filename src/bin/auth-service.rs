use anyhow::Result;
use task_auth::{cli, server, telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli::auth_command().get_matches();
    telemetry::init(cli::verbosity(&matches))?;

    let settings = cli::auth_settings(&matches)?;
    server::run_auth_service(settings, server::shutdown_signal()).await
}
