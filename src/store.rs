//! Thin async glue over the Redis client: key scans, runner hash reads,
//! heartbeat lookups, and consumer-group introspection. Every dashboard
//! component talks to the store through this module; nothing here mutates
//! the monitored system.

use std::collections::HashMap;

use redis::aio::ConnectionManager;
use redis::{from_redis_value, Value};
use thiserror::Error;

/// Suffix of the per-runner state hash key; the prefix is the runner name.
pub const RUNNER_KEY_SUFFIX: &str = "::runner::gw";

#[derive(Debug, Error)]
pub enum StoreError {
    /// The key does not exist. A valid terminal state for heartbeat reads,
    /// never conflated with a transport failure.
    #[error("key not found")]
    NotFound,
    #[error("{0}")]
    Redis(#[from] redis::RedisError),
    #[error("unexpected reply: {0}")]
    Reply(String),
}

/// Connection parameters taken from the CLI.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    pub host: String,
    pub port: u16,
    pub password: String,
    pub db: i64,
}

impl StoreConfig {
    pub fn url(&self) -> String {
        if self.password.is_empty() {
            format!("redis://{}:{}/{}", self.host, self.port, self.db)
        } else {
            format!("redis://:{}@{}:{}/{}", self.password, self.host, self.port, self.db)
        }
    }

    /// Short endpoint label for the footer, without credentials.
    pub fn endpoint(&self) -> String {
        format!("{}:{}@{}", self.host, self.port, self.db)
    }
}

/// Consumer-group status for one monitored stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupStatus {
    pub last_delivered_id: String,
    pub lag: i64,
    pub pending: i64,
}

/// Cloneable handle to the store. All components share one handle read-only;
/// it is torn down by dropping the shell at shutdown.
#[derive(Clone)]
pub struct Store {
    conn: ConnectionManager,
}

impl Store {
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let client = redis::Client::open(config.url().as_str())?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    /// Lists key names matching `pattern`.
    pub async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        let keys: Vec<String> = redis::cmd("KEYS")
            .arg(pattern)
            .query_async(&mut conn)
            .await?;
        Ok(keys)
    }

    /// Lists the names of all runners currently advertising a state hash.
    pub async fn runner_names(&self) -> Result<Vec<String>, StoreError> {
        let keys = self.keys(&format!("*{RUNNER_KEY_SUFFIX}")).await?;
        Ok(keys
            .into_iter()
            .map(|key| {
                key.strip_suffix(RUNNER_KEY_SUFFIX)
                    .map(str::to_owned)
                    .unwrap_or(key)
            })
            .collect())
    }

    /// Reads the full state hash for one runner. A missing hash comes back
    /// as an empty map, same as the store reports it.
    pub async fn runner_fields(&self, name: &str) -> Result<HashMap<String, String>, StoreError> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(runner_key(name))
            .query_async(&mut conn)
            .await?;
        Ok(fields)
    }

    /// Reads one runner's heartbeat timestamp. `NotFound` means the runner
    /// has never written a heartbeat.
    pub async fn heartbeat(&self, name: &str) -> Result<String, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(heartbeat_key(name))
            .query_async(&mut conn)
            .await?;
        value.ok_or(StoreError::NotFound)
    }

    /// Count of delivered-but-unacknowledged entries on one runner's stream.
    pub async fn pending_count(&self, name: &str) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        let value: Value = redis::cmd("XPENDING")
            .arg(stream_key(name))
            .arg(readgroup_key(name))
            .query_async(&mut conn)
            .await?;
        parse_pending_reply(&value)
    }

    /// Consumer-group status of a queue stream. All pipeline consumers share
    /// one group per stream, so only the first group is reported.
    pub async fn group_info(&self, stream: &str) -> Result<GroupStatus, StoreError> {
        let mut conn = self.conn.clone();
        let value: Value = redis::cmd("XINFO")
            .arg("GROUPS")
            .arg(stream)
            .query_async(&mut conn)
            .await?;
        parse_groups_reply(&value)
    }
}

pub fn runner_key(name: &str) -> String {
    format!("{name}{RUNNER_KEY_SUFFIX}")
}

pub fn heartbeat_key(name: &str) -> String {
    format!("{name}::runner::heartbeat::gw")
}

pub fn stream_key(name: &str) -> String {
    format!("{name}::runner::stream::gw")
}

pub fn readgroup_key(name: &str) -> String {
    format!("{name}::runner::readgroup::gw")
}

/// XPENDING summary reply: `[count, min-id, max-id, consumers]`.
fn parse_pending_reply(value: &Value) -> Result<i64, StoreError> {
    match value {
        Value::Nil => Ok(0),
        Value::Array(items) => match items.first() {
            Some(count) => Ok(from_redis_value(count)?),
            None => Err(StoreError::Reply("empty XPENDING summary".to_string())),
        },
        other => Err(StoreError::Reply(format!("XPENDING: {other:?}"))),
    }
}

/// XINFO GROUPS reply: an array of field maps, one per group. The `lag`
/// field is nil while the stream trims entries the group never saw.
fn parse_groups_reply(value: &Value) -> Result<GroupStatus, StoreError> {
    let groups = match value {
        Value::Array(groups) => groups,
        other => return Err(StoreError::Reply(format!("XINFO GROUPS: {other:?}"))),
    };
    let group = groups
        .first()
        .ok_or_else(|| StoreError::Reply("no consumer groups".to_string()))?;
    let fields: HashMap<String, Value> = from_redis_value(group)?;

    let last_delivered_id = match fields.get("last-delivered-id") {
        Some(value) => from_redis_value(value)?,
        None => String::new(),
    };
    let lag = match fields.get("lag") {
        Some(value) => from_redis_value::<Option<i64>>(value)?.unwrap_or(0),
        None => 0,
    };
    let pending = match fields.get("pending") {
        Some(value) => from_redis_value(value)?,
        None => 0,
    };
    Ok(GroupStatus {
        last_delivered_id,
        lag,
        pending,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bulk(text: &str) -> Value {
        Value::BulkString(text.as_bytes().to_vec())
    }

    #[test]
    fn runner_names_strip_the_namespace_suffix() {
        assert_eq!(runner_key("gpu1"), "gpu1::runner::gw");
        let stripped = "gpu1::runner::gw"
            .strip_suffix(RUNNER_KEY_SUFFIX)
            .unwrap();
        assert_eq!(stripped, "gpu1");
    }

    #[test]
    fn pending_reply_takes_the_summary_count() {
        let value = Value::Array(vec![
            Value::Int(3),
            bulk("1-0"),
            bulk("5-0"),
            Value::Array(vec![]),
        ]);
        assert_eq!(parse_pending_reply(&value).unwrap(), 3);
    }

    #[test]
    fn pending_reply_nil_means_nothing_pending() {
        assert_eq!(parse_pending_reply(&Value::Nil).unwrap(), 0);
    }

    #[test]
    fn groups_reply_reads_the_first_group() {
        let group = Value::Array(vec![
            bulk("name"),
            bulk("workers"),
            bulk("consumers"),
            Value::Int(2),
            bulk("pending"),
            Value::Int(1),
            bulk("last-delivered-id"),
            bulk("7-0"),
            bulk("lag"),
            Value::Int(4),
        ]);
        let status = parse_groups_reply(&Value::Array(vec![group])).unwrap();
        assert_eq!(
            status,
            GroupStatus {
                last_delivered_id: "7-0".to_string(),
                lag: 4,
                pending: 1,
            }
        );
    }

    #[test]
    fn groups_reply_tolerates_nil_lag() {
        let group = Value::Array(vec![
            bulk("last-delivered-id"),
            bulk("7-0"),
            bulk("pending"),
            Value::Int(0),
            bulk("lag"),
            Value::Nil,
        ]);
        let status = parse_groups_reply(&Value::Array(vec![group])).unwrap();
        assert_eq!(status.lag, 0);
    }

    #[test]
    fn empty_groups_reply_is_an_error() {
        let err = parse_groups_reply(&Value::Array(vec![])).unwrap_err();
        assert!(matches!(err, StoreError::Reply(_)));
    }

    #[test]
    fn url_omits_empty_password() {
        let config = StoreConfig {
            host: "127.0.0.1".to_string(),
            port: 6379,
            password: String::new(),
            db: 2,
        };
        assert_eq!(config.url(), "redis://127.0.0.1:6379/2");

        let with_password = StoreConfig {
            password: "hunter2".to_string(),
            ..config
        };
        assert_eq!(with_password.url(), "redis://:hunter2@127.0.0.1:6379/2");
    }
}
