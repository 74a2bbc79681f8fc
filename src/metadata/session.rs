/// Thin adapter over a row-returning database session.
///
/// The fetcher consumes sessions exclusively through the `CatalogSession`
/// trait so tests can script them; production sessions speak the MySQL
/// protocol through `mysql_async`. Queries are plain text and rows are
/// consumed positionally, so no prepared-statement machinery is involved.
use std::time::Duration;

use async_trait::async_trait;
use mysql_async::prelude::Queryable;

use crate::error::{ConnectError, QueryError};

/// One result row. Columns are accessed by position; NULL is preserved and
/// numeric accessors coerce leniently (NULL or garbage falls back to the
/// caller's default, matching text-protocol behavior).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row(Vec<Option<String>>);

impl Row {
    pub fn new(values: Vec<Option<String>>) -> Self {
        Row(values)
    }

    /// `None` for NULL or an out-of-range index.
    pub fn get(&self, idx: usize) -> Option<&str> {
        self.0.get(idx).and_then(|v| v.as_deref())
    }

    /// NULL coalesces to the empty string.
    pub fn text(&self, idx: usize) -> String {
        self.get(idx).unwrap_or_default().to_string()
    }

    pub fn float_or(&self, idx: usize, default: f32) -> f32 {
        self.get(idx)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    pub fn uint_or(&self, idx: usize, default: u32) -> u32 {
        self.get(idx)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }
}

/// A session to one catalog-speaking node.
///
/// `connect` and `query` fail with distinct error kinds so the fetcher can
/// tell "couldn't reach this node at all" from "reached it but the query
/// broke" and decide whether the session is worth keeping.
#[async_trait]
pub trait CatalogSession: Send {
    async fn connect(
        &mut self,
        host: &str,
        port: u16,
        user: &str,
        password: &str,
        timeout: Duration,
    ) -> Result<(), ConnectError>;

    async fn query(&mut self, sql: &str) -> Result<Vec<Row>, QueryError>;

    fn is_connected(&self) -> bool;

    /// `host:port` of the live connection, if any.
    fn address(&self) -> Option<String>;
}

/// Creates fresh, unconnected sessions. The fetcher owns every session it
/// creates; nothing here is shared.
pub trait SessionFactory: Send + Sync {
    fn create(&self) -> Box<dyn CatalogSession>;
}

/// Production session backed by `mysql_async`.
#[derive(Default)]
pub struct MySqlSession {
    conn: Option<mysql_async::Conn>,
    address: Option<String>,
}

fn value_to_text(value: mysql_async::Value) -> Option<String> {
    use mysql_async::Value;
    match value {
        Value::NULL => None,
        Value::Bytes(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Value::Int(n) => Some(n.to_string()),
        Value::UInt(n) => Some(n.to_string()),
        Value::Float(n) => Some(n.to_string()),
        Value::Double(n) => Some(n.to_string()),
        Value::Date(y, mo, d, h, mi, s, _) => {
            Some(format!("{y:04}-{mo:02}-{d:02} {h:02}:{mi:02}:{s:02}"))
        }
        Value::Time(neg, _, h, mi, s, _) => {
            Some(format!("{}{h:02}:{mi:02}:{s:02}", if neg { "-" } else { "" }))
        }
    }
}

#[async_trait]
impl CatalogSession for MySqlSession {
    async fn connect(
        &mut self,
        host: &str,
        port: u16,
        user: &str,
        password: &str,
        timeout: Duration,
    ) -> Result<(), ConnectError> {
        self.conn = None;
        self.address = None;

        let opts = mysql_async::OptsBuilder::default()
            .ip_or_hostname(host)
            .tcp_port(port)
            .user(Some(user))
            .pass(Some(password))
            .prefer_socket(false);

        match tokio::time::timeout(timeout, mysql_async::Conn::new(opts)).await {
            Ok(Ok(conn)) => {
                self.conn = Some(conn);
                self.address = Some(format!("{host}:{port}"));
                Ok(())
            }
            Ok(Err(err)) => Err(ConnectError {
                host: host.to_string(),
                port,
                reason: err.to_string(),
            }),
            Err(_) => Err(ConnectError {
                host: host.to_string(),
                port,
                reason: format!("connect timed out after {}s", timeout.as_secs()),
            }),
        }
    }

    async fn query(&mut self, sql: &str) -> Result<Vec<Row>, QueryError> {
        let conn = self.conn.as_mut().ok_or(QueryError::NotConnected)?;
        let rows: Vec<mysql_async::Row> = conn
            .query(sql)
            .await
            .map_err(|err| QueryError::Failed(err.to_string()))?;
        Ok(rows
            .into_iter()
            .map(|row| Row::new(row.unwrap().into_iter().map(value_to_text).collect()))
            .collect())
    }

    fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    fn address(&self) -> Option<String> {
        self.address.clone()
    }
}

pub struct MySqlSessionFactory;

impl SessionFactory for MySqlSessionFactory {
    fn create(&self) -> Box<dyn CatalogSession> {
        Box::new(MySqlSession::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(values: &[Option<&str>]) -> Row {
        Row::new(values.iter().map(|v| v.map(str::to_string)).collect())
    }

    #[test]
    fn row_text_coalesces_null() {
        let r = row(&[Some("a"), None]);
        assert_eq!(r.text(0), "a");
        assert_eq!(r.text(1), "");
        assert_eq!(r.text(5), "");
        assert_eq!(r.get(1), None);
    }

    #[test]
    fn row_numeric_coercions() {
        let r = row(&[Some("0.2"), Some("99"), None, Some("garbage")]);
        assert_eq!(r.float_or(0, 0.0), 0.2);
        assert_eq!(r.uint_or(1, 0), 99);
        assert_eq!(r.float_or(2, 0.0), 0.0);
        assert_eq!(r.uint_or(2, 7), 7);
        assert_eq!(r.uint_or(3, 0), 0);
        assert_eq!(r.uint_or(42, 0), 0);
    }

    #[test]
    fn value_conversion() {
        use mysql_async::Value;
        assert_eq!(value_to_text(Value::NULL), None);
        assert_eq!(
            value_to_text(Value::Bytes(b"localhost:3310".to_vec())),
            Some("localhost:3310".to_string())
        );
        assert_eq!(value_to_text(Value::Int(-3)), Some("-3".to_string()));
        assert_eq!(value_to_text(Value::UInt(99)), Some("99".to_string()));
    }

    #[tokio::test]
    async fn unconnected_session_refuses_queries() {
        let mut session = MySqlSession::default();
        assert!(!session.is_connected());
        assert_eq!(session.address(), None);
        assert!(matches!(
            session.query("SELECT 1").await,
            Err(QueryError::NotConnected)
        ));
    }
}
