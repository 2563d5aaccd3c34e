use aws_config::BehaviorVersion;
use aws_lambda_events::apigw::ApiGatewayProxyRequest;
use flight_stats_api::config::QueryConfig;
use flight_stats_api::warehouse::memory::MemoryWarehouse;
use flight_stats_api::warehouse::snowflake::SnowflakeConnector;
use flight_stats_api::warehouse::Session;
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Error> {
    flight_stats_api::set_up_logging();

    info!(
        "Initializing {} version {}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    let config = QueryConfig::load_from_env()?;

    // local runs serve a JSON file of flight records instead of the warehouse
    if let Ok(path) = std::env::var("FLIGHTS_FILE") {
        info!("Serving {} from {}", config.endpoint, path);
        let session = Session::new(MemoryWarehouse::from_json(&tokio::fs::read(&path).await?)?);
        return run(service_fn(|request: LambdaEvent<ApiGatewayProxyRequest>| {
            flight_stats_api::service::handler(&session, config.endpoint, request)
        }))
        .await;
    }

    let aws_config = aws_config::load_defaults(BehaviorVersion::v2023_11_09()).await;
    info!("Serving {} from {}", config.endpoint, config.table);

    // connects on the first request and is reused while the execution context lives
    let session = Session::new(SnowflakeConnector::new(&aws_config, &config));

    run(service_fn(|request: LambdaEvent<ApiGatewayProxyRequest>| {
        flight_stats_api::service::handler(&session, config.endpoint, request)
    }))
    .await
}
