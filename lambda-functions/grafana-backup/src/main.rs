use grafana_backup::{
    CommandEngine, GrafanaBackupService, LogLevel, Request, Response, RuntimeParameters,
};
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use tracing_subscriber::EnvFilter;

async fn function_handler(event: LambdaEvent<Request>) -> Result<Response, Error> {
    let parameters = RuntimeParameters::from_env();
    let service = GrafanaBackupService::new(parameters).await;
    let engine = CommandEngine::from_env();

    // Failures propagate as invocation errors; the 200 body is reserved
    // for success.
    Ok(service.run(event.payload, &engine).await?)
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let log_level = LogLevel::from_env();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_level.as_directive()))
        .json()
        .init();

    run(service_fn(function_handler)).await
}
