//! Driver port implementation over the RethinkDB JSON protocol.

use async_trait::async_trait;
use serde_json::Value;
use tokio::net::TcpStream;
use tracing::{debug, info};

use super::connection::WireConnection;
use super::handshake::{ScramClient, handshake};
use super::protocol;
use crate::domain::ConnectionSettings;
use crate::domain::IndexSpec;
use crate::domain::ports::{DatabaseConnector, DatabaseDriver, DatabaseDriverError};

/// Opens authenticated TCP connections to a RethinkDB server.
#[derive(Debug, Clone, Copy, Default)]
pub struct RethinkDbConnector;

#[async_trait]
impl DatabaseConnector for RethinkDbConnector {
    type Driver = RethinkDbDriver;

    async fn connect(
        &self,
        settings: &ConnectionSettings,
    ) -> Result<RethinkDbDriver, DatabaseDriverError> {
        let address = (settings.host(), settings.port());
        debug!(host = address.0, port = address.1, "opening database socket");
        let stream = TcpStream::connect(address).await.map_err(|error| {
            DatabaseDriverError::connection(format!(
                "could not reach {}:{}: {error}",
                address.0, address.1
            ))
        })?;
        stream
            .set_nodelay(true)
            .map_err(|error| DatabaseDriverError::connection(error.to_string()))?;

        let scram = ScramClient::with_random_nonce(settings.user(), settings.password());
        let stream = handshake(stream, &scram).await?;
        info!(user = settings.user(), "database handshake complete");
        Ok(RethinkDbDriver::new(WireConnection::spawn(stream)))
    }
}

/// A live RethinkDB connection.
pub struct RethinkDbDriver {
    connection: WireConnection,
}

impl RethinkDbDriver {
    pub(crate) fn new(connection: WireConnection) -> Self {
        Self { connection }
    }

    async fn write(&self, term: Value) -> Result<(), DatabaseDriverError> {
        let summaries = self.connection.run(term).await?;
        protocol::check_write(&summaries)
    }
}

#[async_trait]
impl DatabaseDriver for RethinkDbDriver {
    async fn list_databases(&self) -> Result<Vec<String>, DatabaseDriverError> {
        protocol::string_list(self.connection.run(protocol::db_list()).await?)
    }

    async fn create_database(&self, database: &str) -> Result<(), DatabaseDriverError> {
        self.write(protocol::db_create(database)).await
    }

    async fn list_tables(&self, database: &str) -> Result<Vec<String>, DatabaseDriverError> {
        protocol::string_list(self.connection.run(protocol::table_list(database)).await?)
    }

    async fn create_table(
        &self,
        database: &str,
        table: &str,
        primary_key: &str,
    ) -> Result<(), DatabaseDriverError> {
        self.write(protocol::table_create(database, table, primary_key))
            .await
    }

    async fn list_indexes(
        &self,
        database: &str,
        table: &str,
    ) -> Result<Vec<String>, DatabaseDriverError> {
        protocol::string_list(
            self.connection
                .run(protocol::index_list(database, table))
                .await?,
        )
    }

    async fn create_index(
        &self,
        database: &str,
        table: &str,
        index: &IndexSpec,
    ) -> Result<(), DatabaseDriverError> {
        self.write(protocol::index_create(database, table, index))
            .await
    }

    async fn wait_for_index(
        &self,
        database: &str,
        table: &str,
        index: &str,
    ) -> Result<(), DatabaseDriverError> {
        self.connection
            .run(protocol::index_wait(database, table, index))
            .await
            .map(drop)
    }

    async fn delete_all(&self, database: &str, table: &str) -> Result<(), DatabaseDriverError> {
        self.write(protocol::delete_all(database, table)).await
    }

    async fn insert(
        &self,
        database: &str,
        table: &str,
        records: Vec<Value>,
    ) -> Result<(), DatabaseDriverError> {
        self.write(protocol::insert(database, table, &records)).await
    }
}

#[cfg(test)]
mod tests {
    //! Driver calls against a scripted server.

    use rstest::rstest;
    use serde_json::json;
    use tokio::io::duplex;

    use super::*;
    use crate::outbound::rethinkdb::connection::tests::{read_query, respond};

    #[rstest]
    #[tokio::test]
    async fn list_tables_reads_the_atom_array() {
        let (client, mut server) = duplex(4096);
        let driver = RethinkDbDriver::new(WireConnection::spawn(client));
        let script = tokio::spawn(async move {
            let (token, query) = read_query(&mut server).await;
            assert_eq!(query, json!([1, [62, [[14, ["test"]]]], {}]));
            respond(&mut server, token, json!({"t": 1, "r": [["logs", "users"]]})).await;
            server
        });

        let tables = driver.list_tables("test").await.expect("list should succeed");

        assert_eq!(tables, ["logs", "users"]);
        script.await.expect("script should finish");
    }

    #[rstest]
    #[tokio::test]
    async fn insert_reports_the_first_document_error() {
        let (client, mut server) = duplex(4096);
        let driver = RethinkDbDriver::new(WireConnection::spawn(client));
        let script = tokio::spawn(async move {
            let (token, query) = read_query(&mut server).await;
            assert_eq!(query[1][0], json!(56));
            respond(
                &mut server,
                token,
                json!({"t": 1, "r": [{
                    "inserted": 0,
                    "errors": 1,
                    "first_error": "Duplicate primary key `id`"
                }]}),
            )
            .await;
            server
        });

        let result = driver
            .insert("test", "users", vec![json!({"id": 1})])
            .await;

        assert_eq!(result, Err(DatabaseDriverError::query("Duplicate primary key `id`")));
        script.await.expect("script should finish");
    }

    #[rstest]
    #[tokio::test]
    async fn runtime_errors_surface_verbatim() {
        let (client, mut server) = duplex(4096);
        let driver = RethinkDbDriver::new(WireConnection::spawn(client));
        let script = tokio::spawn(async move {
            let (token, _) = read_query(&mut server).await;
            respond(
                &mut server,
                token,
                json!({"t": 18, "r": ["Table `test.logs` already exists."]}),
            )
            .await;
            server
        });

        let result = driver.create_table("test", "logs", "id").await;

        assert_eq!(
            result,
            Err(DatabaseDriverError::query("Table `test.logs` already exists."))
        );
        script.await.expect("script should finish");
    }
}
