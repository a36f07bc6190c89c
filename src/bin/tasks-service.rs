use anyhow::Result;
use task_auth::{cli, server, telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli::tasks_command().get_matches();
    telemetry::init(cli::verbosity(&matches))?;

    let settings = cli::tasks_settings(&matches)?;
    server::run_tasks_service(settings, server::shutdown_signal()).await
}
