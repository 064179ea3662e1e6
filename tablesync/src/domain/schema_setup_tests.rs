//! Unit tests for the caller-facing setup operations.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use rstest::rstest;
use serde_json::{Value, json};

use super::{Connection, connect_and_setup, empty, load, setup};
use crate::domain::ports::{DatabaseConnector, DatabaseDriverError, MockDatabaseDriver};
use crate::domain::{ConfigError, ConnectionSettings, SchemaConfig, SetupError};

/// Connector handing out one prepared mock driver.
struct StubConnector {
    driver: Mutex<Option<MockDatabaseDriver>>,
    refusal: Option<String>,
    attempts: AtomicUsize,
}

impl StubConnector {
    fn with_driver(driver: MockDatabaseDriver) -> Self {
        Self {
            driver: Mutex::new(Some(driver)),
            refusal: None,
            attempts: AtomicUsize::new(0),
        }
    }

    fn refusing(message: &str) -> Self {
        Self {
            driver: Mutex::new(None),
            refusal: Some(message.to_owned()),
            attempts: AtomicUsize::new(0),
        }
    }

    fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DatabaseConnector for StubConnector {
    type Driver = MockDatabaseDriver;

    async fn connect(
        &self,
        _settings: &ConnectionSettings,
    ) -> Result<MockDatabaseDriver, DatabaseDriverError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.refusal {
            return Err(DatabaseDriverError::connection(message.clone()));
        }
        self.driver
            .lock()
            .expect("stub connector lock")
            .take()
            .ok_or_else(|| DatabaseDriverError::connection("stub driver already taken"))
    }
}

fn config(value: Value) -> SchemaConfig {
    serde_json::from_value(value).expect("valid config")
}

fn connection(driver: MockDatabaseDriver) -> Connection<MockDatabaseDriver> {
    Connection::new(Arc::new(driver), "test")
}

#[rstest]
#[tokio::test]
async fn setup_requires_tables() {
    let result = setup(&connection(MockDatabaseDriver::new()), &config(json!({}))).await;

    assert_eq!(result, Err(SetupError::Config(ConfigError::MissingTables)));
}

#[rstest]
#[tokio::test]
async fn malformed_index_fails_before_any_driver_call() {
    let config = config(json!({"tables": {"users": ["id", {"options": {"geo": true}}]}}));

    let result = setup(&connection(MockDatabaseDriver::new()), &config).await;

    assert!(matches!(
        result,
        Err(SetupError::Config(ConfigError::MissingIndexName { .. }))
    ));
}

#[rstest]
#[tokio::test]
async fn connect_and_setup_validates_before_connecting() {
    let connector = StubConnector::with_driver(MockDatabaseDriver::new());
    let config = config(json!({"tables": {"users": [1]}}));

    let result = connect_and_setup(&connector, &config).await;

    assert!(matches!(
        result,
        Err(SetupError::Config(ConfigError::InvalidPrimaryKey { .. }))
    ));
    assert_eq!(connector.attempts(), 0);
}

#[rstest]
#[tokio::test]
async fn connect_and_setup_returns_a_connection_to_the_default_database() {
    let mut driver = MockDatabaseDriver::new();
    driver
        .expect_list_databases()
        .times(1)
        .returning(|| Ok(vec!["test".to_owned()]));
    driver
        .expect_list_tables()
        .withf(|database| database == "test")
        .times(1)
        .returning(|_| Ok(vec!["users".to_owned()]));
    driver
        .expect_list_indexes()
        .times(1)
        .returning(|_, _| Ok(Vec::new()));
    let connector = StubConnector::with_driver(driver);

    let connection = connect_and_setup(&connector, &config(json!({"tables": {"users": true}})))
        .await
        .expect("setup should succeed");

    assert_eq!(connection.database(), "test");
    assert_eq!(connector.attempts(), 1);
}

#[rstest]
#[tokio::test]
async fn refused_connection_yields_no_connection() {
    let connector = StubConnector::refusing("connection refused");

    let result = connect_and_setup(&connector, &config(json!({"tables": {"users": true}}))).await;

    assert!(matches!(result, Err(SetupError::Connection { .. })));
}

#[rstest]
#[tokio::test]
async fn empty_clears_every_named_table_including_disabled_ones() {
    let mut driver = MockDatabaseDriver::new();
    for table in ["a", "b", "c"] {
        driver
            .expect_delete_all()
            .withf(move |database, name| database == "test" && name == table)
            .times(1)
            .returning(|_, _| Ok(()));
    }
    driver.expect_create_table().times(0);

    let emptied = empty(
        &connection(driver),
        &config(json!({"tables": {"a": true, "b": "id", "c": false}})),
    )
    .await
    .expect("empty should succeed");

    assert_eq!(emptied, 3);
}

#[rstest]
#[tokio::test]
async fn empty_requires_tables() {
    let result = empty(&connection(MockDatabaseDriver::new()), &config(json!({}))).await;

    assert_eq!(result, Err(SetupError::Config(ConfigError::MissingTables)));
}

#[rstest]
#[tokio::test]
async fn load_accepts_single_documents_and_arrays() {
    let mut driver = MockDatabaseDriver::new();
    driver
        .expect_insert()
        .withf(|_, table, records| table == "users" && records.len() == 2)
        .times(1)
        .returning(|_, _, _| Ok(()));
    driver
        .expect_insert()
        .withf(|_, table, records| table == "settings" && records.len() == 1)
        .times(1)
        .returning(|_, _, _| Ok(()));

    let records = json!({
        "users": [{"id": 1}, {"id": 2}],
        "settings": {"id": "theme", "value": "dark"},
    });
    let Value::Object(records) = records else {
        panic!("records fixture must be an object");
    };

    let loaded = load(&connection(driver), &records)
        .await
        .expect("load should succeed");

    assert_eq!(loaded, 3);
}

#[rstest]
#[tokio::test]
async fn load_surfaces_insert_failures() {
    let mut driver = MockDatabaseDriver::new();
    driver
        .expect_insert()
        .times(1)
        .returning(|_, _, _| {
            Err(DatabaseDriverError::query(
                "Table `test.missing` does not exist.",
            ))
        });

    let Value::Object(records) = json!({"missing": {"id": 1}}) else {
        panic!("records fixture must be an object");
    };
    let result = load(&connection(driver), &records).await;

    assert!(matches!(result, Err(SetupError::Driver { .. })));
}
