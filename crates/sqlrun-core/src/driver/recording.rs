use std::sync::{Arc, Mutex};

use super::{DatabaseSession, DriverError, ExecResp, QueryResp};

/// 记录收到的语句，包含 `fail_on` 子串的语句返回错误；
/// 设置 `disconnect_after` 后，超出该条数的语句一律返回连接断开
#[derive(Default)]
pub(crate) struct RecordingSession {
    pub log: Arc<Mutex<Vec<String>>>,
    pub fail_on: Option<String>,
    pub disconnect_after: Option<usize>,
    pub resp: QueryResp,
}

impl RecordingSession {
    pub fn new() -> (Self, Arc<Mutex<Vec<String>>>) {
        let session = Self::default();
        let log = session.log.clone();
        (session, log)
    }

    pub fn failing_on(marker: &str) -> (Self, Arc<Mutex<Vec<String>>>) {
        let (mut session, log) = Self::new();
        session.fail_on = Some(marker.to_string());
        (session, log)
    }

    pub fn disconnecting_after(ok: usize) -> (Self, Arc<Mutex<Vec<String>>>) {
        let (mut session, log) = Self::new();
        session.disconnect_after = Some(ok);
        (session, log)
    }

    fn record(
        &self,
        sql: &str,
    ) -> Result<(), DriverError> {
        let mut log = self.log.lock().unwrap();
        log.push(sql.to_string());
        if self.disconnect_after.is_some_and(|ok| log.len() > ok) {
            return Err(DriverError::Connection("broken pipe".into()));
        }
        match &self.fail_on {
            Some(marker) if sql.contains(marker.as_str()) => Err(DriverError::Other(format!("rejected: {}", sql))),
            _ => Ok(()),
        }
    }
}

impl DatabaseSession for RecordingSession {
    fn exec(
        &mut self,
        sql: &str,
    ) -> Result<ExecResp, DriverError> {
        self.record(sql)?;
        Ok(ExecResp { affected: 1 })
    }

    fn query(
        &mut self,
        sql: &str,
    ) -> Result<QueryResp, DriverError> {
        self.record(sql)?;
        Ok(self.resp.clone())
    }

    fn close(self: Box<Self>) -> Result<(), DriverError> {
        self.log.lock().unwrap().push("<close>".into());
        Ok(())
    }
}
