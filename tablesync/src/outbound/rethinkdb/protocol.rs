//! ReQL term construction and JSON wire framing.
//!
//! Queries are serialised as `[type, term, optargs]` and framed by an
//! 8-byte little-endian token followed by a 4-byte little-endian length.
//! Responses reuse the same framing with a JSON body carrying the response
//! type `t` and the result array `r`.

use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::domain::IndexSpec;
use crate::domain::ports::DatabaseDriverError;

/// Bytes preceding every frame body: token then length.
pub(crate) const FRAME_HEADER_LEN: usize = 12;

/// Term type codes used by the driver.
mod term {
    pub(super) const MAKE_ARRAY: u64 = 2;
    pub(super) const DB: u64 = 14;
    pub(super) const TABLE: u64 = 15;
    pub(super) const DELETE: u64 = 54;
    pub(super) const INSERT: u64 = 56;
    pub(super) const DB_CREATE: u64 = 57;
    pub(super) const DB_LIST: u64 = 59;
    pub(super) const TABLE_CREATE: u64 = 60;
    pub(super) const TABLE_LIST: u64 = 62;
    pub(super) const INDEX_CREATE: u64 = 75;
    pub(super) const INDEX_LIST: u64 = 77;
    pub(super) const INDEX_WAIT: u64 = 140;
}

const QUERY_START: u64 = 1;
const QUERY_CONTINUE: u64 = 2;

/// Convert a JSON value to a ReQL datum term.
///
/// Literal arrays must be wrapped in `MAKE_ARRAY` or the server would read
/// them as terms. Objects are literal but their values are converted too.
pub(crate) fn datum(value: &Value) -> Value {
    match value {
        Value::Array(items) => {
            json!([term::MAKE_ARRAY, items.iter().map(datum).collect::<Vec<_>>()])
        }
        Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(key, value)| (key.clone(), datum(value)))
                .collect(),
        ),
        scalar => scalar.clone(),
    }
}

pub(crate) fn db(database: &str) -> Value {
    json!([term::DB, [database]])
}

pub(crate) fn table(database: &str, table: &str) -> Value {
    json!([term::TABLE, [db(database), table]])
}

pub(crate) fn db_list() -> Value {
    json!([term::DB_LIST])
}

pub(crate) fn db_create(database: &str) -> Value {
    json!([term::DB_CREATE, [database]])
}

pub(crate) fn table_list(database: &str) -> Value {
    json!([term::TABLE_LIST, [db(database)]])
}

pub(crate) fn table_create(database: &str, name: &str, primary_key: &str) -> Value {
    json!([
        term::TABLE_CREATE,
        [db(database), name],
        {"primary_key": primary_key}
    ])
}

pub(crate) fn index_list(database: &str, name: &str) -> Value {
    json!([term::INDEX_LIST, [table(database, name)]])
}

/// `index_create`, passing the declared function term verbatim and the
/// declared options as optargs.
pub(crate) fn index_create(database: &str, name: &str, index: &IndexSpec) -> Value {
    let mut args = vec![table(database, name), Value::from(index.key())];
    if let Some(function) = index.index_function() {
        args.push(function.term().clone());
    }
    let optargs: Map<String, Value> = index
        .options()
        .iter()
        .map(|(key, value)| (key.clone(), datum(value)))
        .collect();
    if optargs.is_empty() {
        json!([term::INDEX_CREATE, args])
    } else {
        json!([term::INDEX_CREATE, args, optargs])
    }
}

pub(crate) fn index_wait(database: &str, name: &str, index: &str) -> Value {
    json!([term::INDEX_WAIT, [table(database, name), index]])
}

pub(crate) fn delete_all(database: &str, name: &str) -> Value {
    json!([term::DELETE, [table(database, name)]])
}

pub(crate) fn insert(database: &str, name: &str, records: &[Value]) -> Value {
    let documents = Value::Array(records.to_vec());
    json!([term::INSERT, [table(database, name), datum(&documents)]])
}

pub(crate) fn start_query(term: Value) -> Value {
    json!([QUERY_START, term, {}])
}

pub(crate) fn continue_query() -> Value {
    json!([QUERY_CONTINUE])
}

/// Serialise `query` into one frame addressed by `token`.
pub(crate) fn encode_frame(token: u64, query: &Value) -> Result<Vec<u8>, DatabaseDriverError> {
    let body = serde_json::to_vec(query)
        .map_err(|error| DatabaseDriverError::query(format!("failed to encode query: {error}")))?;
    let length = u32::try_from(body.len())
        .map_err(|_| DatabaseDriverError::query("query exceeds the maximum frame size"))?;
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
    frame.extend_from_slice(&token.to_le_bytes());
    frame.extend_from_slice(&length.to_le_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Kind of a server response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResponseKind {
    Atom,
    Sequence,
    Partial,
    WaitComplete,
    ServerInfo,
    ClientError,
    CompileError,
    RuntimeError,
}

impl ResponseKind {
    fn from_code(code: u64) -> Option<Self> {
        let kind = match code {
            1 => Self::Atom,
            2 => Self::Sequence,
            3 => Self::Partial,
            4 => Self::WaitComplete,
            5 => Self::ServerInfo,
            16 => Self::ClientError,
            17 => Self::CompileError,
            18 => Self::RuntimeError,
            _ => return None,
        };
        Some(kind)
    }

    fn is_error(self) -> bool {
        matches!(
            self,
            Self::ClientError | Self::CompileError | Self::RuntimeError
        )
    }
}

#[derive(Deserialize)]
struct RawResponse {
    t: u64,
    #[serde(default)]
    r: Vec<Value>,
}

/// A decoded response body.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Response {
    pub(crate) kind: ResponseKind,
    pub(crate) results: Vec<Value>,
}

impl Response {
    /// Decode a frame body, turning server-reported errors into
    /// [`DatabaseDriverError::Query`].
    pub(crate) fn decode(body: &[u8]) -> Result<Self, DatabaseDriverError> {
        let raw: RawResponse = serde_json::from_slice(body).map_err(|error| {
            DatabaseDriverError::connection(format!("malformed response: {error}"))
        })?;
        let kind = ResponseKind::from_code(raw.t).ok_or_else(|| {
            DatabaseDriverError::connection(format!("unknown response type {}", raw.t))
        })?;
        if kind.is_error() {
            let message = raw
                .r
                .first()
                .and_then(Value::as_str)
                .unwrap_or("unknown server error");
            return Err(DatabaseDriverError::query(message));
        }
        Ok(Self {
            kind,
            results: raw.r,
        })
    }
}

/// Flatten an atom holding an array, or a sequence, into its strings.
pub(crate) fn string_list(values: Vec<Value>) -> Result<Vec<String>, DatabaseDriverError> {
    let items = match values.as_slice() {
        [Value::Array(items)] => items.clone(),
        _ => values,
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::String(name) => Ok(name),
            other => Err(DatabaseDriverError::query(format!(
                "expected a list of names, found {other}"
            ))),
        })
        .collect()
}

/// Fail when a write summary reports per-document errors.
pub(crate) fn check_write(values: &[Value]) -> Result<(), DatabaseDriverError> {
    for summary in values {
        let errors = summary.get("errors").and_then(Value::as_u64).unwrap_or(0);
        if errors > 0 {
            let message = summary
                .get("first_error")
                .and_then(Value::as_str)
                .unwrap_or("write failed");
            return Err(DatabaseDriverError::query(message));
        }
    }
    Ok(())
}
