use flight_stats_api::authorizer;
use flight_stats_api::config::AuthorizerConfig;
use flight_stats_api::events::AuthorizerEvent;
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Error> {
    flight_stats_api::set_up_logging();

    info!(
        "Initializing {} authorizer version {}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    let config = AuthorizerConfig::load_from_env()?;

    run(service_fn(|request: LambdaEvent<AuthorizerEvent>| {
        authorizer::handler(&config, request)
    }))
    .await
}
