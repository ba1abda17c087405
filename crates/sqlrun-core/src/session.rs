use std::{
    sync::{Mutex, MutexGuard, PoisonError},
    vec,
};

use crate::{
    DataSourceOptions,
    driver::{DatabaseSession, DriverError, ExecResp, QueryResp, create_connection},
};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("连接失败 {endpoint}: {source}")]
    Connection {
        endpoint: String,
        #[source]
        source: DriverError,
    },
    #[error("会话已关闭: {0}")]
    Closed(String),
    #[error("语句执行失败: {source} (SQL: {sql})")]
    Statement {
        sql: String,
        #[source]
        source: DriverError,
    },
}

impl SessionError {
    /// 连接类错误（含已关闭）对调用方总是致命的
    pub fn is_connection(&self) -> bool {
        matches!(self, SessionError::Connection { .. } | SessionError::Closed(_))
    }
}

/// 单向、一次性的结果游标
#[derive(Debug)]
pub struct RowCursor {
    cols: Vec<String>,
    rows: vec::IntoIter<Vec<Option<String>>>,
}

impl RowCursor {
    pub fn columns(&self) -> &[String] {
        &self.cols
    }
}

impl From<QueryResp> for RowCursor {
    fn from(resp: QueryResp) -> Self {
        Self {
            cols: resp.cols,
            rows: resp.rows.into_iter(),
        }
    }
}

impl Iterator for RowCursor {
    type Item = Vec<Option<String>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rows.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.rows.size_hint()
    }
}

/// 与数据库的一个长连接会话
///
/// 所有操作都经过同一把锁，同一时刻最多只有一条语句在执行，
/// 因此 `Session` 可以放进 `Arc` 在多个调用方之间共享。
/// 关闭后底层连接被释放，后续的 `execute` / `query` 返回 [`SessionError::Closed`]。
pub struct Session {
    endpoint: String,
    inner: Mutex<Option<Box<dyn DatabaseSession>>>,
}

impl Session {
    pub fn open(opts: &DataSourceOptions) -> Result<Self, SessionError> {
        let endpoint = opts.endpoint();
        tracing::info!("正在连接数据库: {}", endpoint);

        let inner = create_connection(opts).map_err(|source| SessionError::Connection {
            endpoint: endpoint.clone(),
            source,
        })?;

        tracing::info!("数据库连接成功: {}", endpoint);
        Ok(Self::with_driver(endpoint, inner))
    }

    pub fn with_driver(
        endpoint: impl Into<String>,
        inner: Box<dyn DatabaseSession>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            inner: Mutex::new(Some(inner)),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn is_open(&self) -> bool {
        self.lock().is_some()
    }

    /// 执行 DDL/DML 语句
    pub fn execute(
        &self,
        sql: &str,
    ) -> Result<ExecResp, SessionError> {
        let mut guard = self.lock();
        let inner = guard
            .as_mut()
            .ok_or_else(|| SessionError::Closed(self.endpoint.clone()))?;

        tracing::debug!(sql = %sql, "执行语句");
        inner.exec(sql).map_err(|source| self.driver_error(sql, source))
    }

    /// 执行查询语句
    pub fn query(
        &self,
        sql: &str,
    ) -> Result<RowCursor, SessionError> {
        let mut guard = self.lock();
        let inner = guard
            .as_mut()
            .ok_or_else(|| SessionError::Closed(self.endpoint.clone()))?;

        tracing::debug!(sql = %sql, "执行查询");
        inner.query(sql).map(RowCursor::from).map_err(|source| self.driver_error(sql, source))
    }

    /// 关闭会话
    ///
    /// 给定 `shutdown` 时先把该命令发给数据库（例如 `SHUTDOWN`），随后释放本地连接。
    /// 关闭命令失败也会释放连接，并返回该错误。重复关闭不做任何事。
    pub fn close(
        &self,
        shutdown: Option<&str>,
    ) -> Result<(), SessionError> {
        let Some(mut inner) = self.lock().take() else {
            tracing::warn!("会话已关闭，忽略重复关闭: {}", self.endpoint);
            return Ok(());
        };

        let shutdown_result = match shutdown {
            Some(command) => {
                tracing::info!("发送关闭命令: {}", command);
                inner.exec(command).map(|_| ()).map_err(|source| SessionError::Statement {
                    sql: command.to_string(),
                    source,
                })
            }
            None => Ok(()),
        };

        let close_result = inner.close().map_err(|source| SessionError::Connection {
            endpoint: self.endpoint.clone(),
            source,
        });
        tracing::info!("会话已关闭: {}", self.endpoint);

        shutdown_result.and(close_result)
    }

    /// 连接断开归为连接错误，其余归为语句错误
    fn driver_error(
        &self,
        sql: &str,
        source: DriverError,
    ) -> SessionError {
        match source {
            DriverError::Connection(_) => SessionError::Connection {
                endpoint: self.endpoint.clone(),
                source,
            },
            source => SessionError::Statement {
                sql: sql.to_string(),
                source,
            },
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Box<dyn DatabaseSession>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        if inner.is_some() {
            tracing::warn!("会话未显式关闭: {}", self.endpoint);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;
    use crate::driver::recording::RecordingSession;

    fn recording() -> (Session, Arc<std::sync::Mutex<Vec<String>>>) {
        let (inner, log) = RecordingSession::new();
        (Session::with_driver("memory://test", Box::new(inner)), log)
    }

    #[test]
    fn execute_after_close_fails_with_connection_error() {
        let (session, log) = recording();
        session.execute("CREATE TABLE t (x INT)").unwrap();
        session.close(None).unwrap();

        let err = session.execute("INSERT INTO t VALUES (1)").unwrap_err();
        assert!(err.is_connection());
        assert!(matches!(err, SessionError::Closed(_)));
        assert!(session.query("SELECT 1").unwrap_err().is_connection());
        assert_eq!(*log.lock().unwrap(), vec!["CREATE TABLE t (x INT)", "<close>"]);
    }

    #[test]
    fn close_sends_shutdown_before_releasing() {
        let (session, log) = recording();
        session.close(Some("SHUTDOWN")).unwrap();
        assert!(!session.is_open());
        assert_eq!(*log.lock().unwrap(), vec!["SHUTDOWN", "<close>"]);
    }

    #[test]
    fn second_close_is_a_no_op() {
        let (session, log) = recording();
        session.close(Some("SHUTDOWN")).unwrap();
        session.close(Some("SHUTDOWN")).unwrap();
        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[test]
    fn failed_shutdown_still_releases_handle() {
        let (inner, log) = RecordingSession::failing_on("SHUTDOWN");
        let session = Session::with_driver("memory://test", Box::new(inner));

        let err = session.close(Some("SHUTDOWN")).unwrap_err();
        assert!(matches!(err, SessionError::Statement { ref sql, .. } if sql == "SHUTDOWN"));
        assert!(!session.is_open());
        assert_eq!(log.lock().unwrap().last().map(String::as_str), Some("<close>"));
    }

    #[test]
    fn statement_error_carries_sql() {
        let (inner, _log) = RecordingSession::failing_on("bogus");
        let session = Session::with_driver("memory://test", Box::new(inner));

        match session.execute("INSERT INTO bogus VALUES (1)") {
            Err(SessionError::Statement { sql, source }) => {
                assert_eq!(sql, "INSERT INTO bogus VALUES (1)");
                assert!(source.to_string().contains("rejected"));
            }
            other => panic!("unexpected: {:?}", other.map(|r| r.affected)),
        }
        assert!(session.is_open());
        session.close(None).unwrap();
    }

    #[test]
    fn lost_link_is_a_connection_error() {
        let (inner, log) = RecordingSession::disconnecting_after(1);
        let session = Session::with_driver("memory://test", Box::new(inner));

        session.execute("INSERT INTO t VALUES (1)").unwrap();
        let err = session.execute("INSERT INTO t VALUES (2)").unwrap_err();
        assert!(err.is_connection());
        assert!(matches!(err, SessionError::Connection { ref endpoint, .. } if endpoint == "memory://test"));
        assert!(session.query("SELECT 1").unwrap_err().is_connection());
        assert_eq!(log.lock().unwrap().len(), 3);
        session.close(None).unwrap();
    }

    #[test]
    fn query_sql_is_logged_once() {
        let buf = Arc::new(std::sync::Mutex::new(Vec::new()));
        let writer = buf.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || LogBuffer(writer.clone()))
            .finish();

        let opts = DataSourceOptions::SQLite(crate::SQLiteOptions {
            readonly: false,
            filepath: ":memory:".into(),
        });
        tracing::subscriber::with_default(subscriber, || {
            let session = Session::open(&opts).unwrap();
            assert_eq!(session.query("SELECT 42 AS answer").unwrap().count(), 1);
            session.close(None).unwrap();
        });

        let text = String::from_utf8(buf.lock().unwrap().clone()).unwrap();
        assert_eq!(text.matches("sql=SELECT 42 AS answer").count(), 1);
        assert!(text.contains("执行查询"));
    }

    struct LogBuffer(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(
            &mut self,
            data: &[u8],
        ) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(data);
            Ok(data.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn query_returns_forward_only_cursor() {
        let (mut inner, _log) = RecordingSession::new();
        inner.resp = QueryResp {
            cols: vec!["id".into()],
            rows: vec![vec![Some("1".into())], vec![Some("2".into())]],
        };
        let session = Session::with_driver("memory://test", Box::new(inner));

        let mut cursor = session.query("SELECT id FROM t").unwrap();
        assert_eq!(cursor.columns(), ["id"]);
        assert_eq!(cursor.next(), Some(vec![Some("1".into())]));
        assert_eq!(cursor.next(), Some(vec![Some("2".into())]));
        assert_eq!(cursor.next(), None);
        session.close(None).unwrap();
    }

    #[test]
    fn shared_session_serializes_callers() {
        let (session, log) = recording();
        let session = Arc::new(session);

        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let session = session.clone();
                thread::spawn(move || {
                    for i in 0..25 {
                        session.execute(&format!("INSERT INTO t VALUES ({worker}, {i})")).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(log.lock().unwrap().len(), 100);
        session.close(None).unwrap();
    }

    #[test]
    fn open_reports_connection_error_with_endpoint() {
        let opts = DataSourceOptions::SQLite(crate::SQLiteOptions::default());
        match Session::open(&opts) {
            Err(err @ SessionError::Connection { .. }) => {
                assert!(err.is_connection());
                assert!(err.to_string().contains("sqlite://"));
            }
            _ => panic!("expected connection error"),
        }
    }
}
