use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::{error, info};

use crate::query::Aggregation;
use crate::value::Row;

pub mod memory;
pub mod snowflake;

#[derive(thiserror::Error, Debug)]
pub enum WarehouseError {
    #[error(transparent)]
    Credentials(#[from] snowflake::CredentialsError),
    #[error("warehouse request failed - {0}")]
    Http(#[from] reqwest::Error),
    #[error("warehouse returned status {status} - {message}")]
    Status { status: u16, message: String },
    /// The warehouse refused to compile the statement, which points at the
    /// table, its columns or the role's grants.
    #[error("warehouse rejected statement - {0}")]
    InvalidStatement(String),
    #[error("unexpected warehouse response - {0}")]
    Decode(String),
}

/// A live connection able to run the fixed aggregations.
#[async_trait]
pub trait Warehouse: Send + Sync {
    async fn aggregate(&self, aggregation: &Aggregation) -> Result<Vec<Row>, WarehouseError>;
}

/// Opens warehouse connections.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    type Connection: Warehouse;

    async fn connect(&self) -> Result<Self::Connection, WarehouseError>;
}

/// Holds the connection for the lifetime of the execution context. It is
/// opened on first use; a failed attempt leaves the session empty so the next
/// invocation tries again.
pub struct Session<F: ConnectionFactory> {
    factory: F,
    connection: OnceCell<F::Connection>,
}

impl<F: ConnectionFactory> Session<F> {
    pub fn new(factory: F) -> Self {
        Session {
            factory,
            connection: OnceCell::new(),
        }
    }

    pub async fn connection(&self) -> Result<&F::Connection, WarehouseError> {
        self.connection
            .get_or_try_init(|| async {
                let connection = self.factory.connect().await.inspect_err(|e| {
                    error!("Failed to connect: {}", e);
                })?;
                info!("Connection established");
                Ok::<_, WarehouseError>(connection)
            })
            .await
    }

    pub fn is_connected(&self) -> bool {
        self.connection.initialized()
    }
}
