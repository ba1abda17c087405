use std::{io::Write, time::Duration};

use serde::Serialize;

use sqlrun_core::{RowCursor, dump};

use crate::config::ReportFormat;

/// JSON Lines 消息
#[derive(Debug, Serialize)]
pub struct ProgressMessage {
    kind: MessageKind,
    data: serde_json::Value,
}

/// 消息类型
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Progress,
    Status,
    Error,
    Rows,
    Completed,
}

/// 任务输出
///
/// `Plain` 格式下只输出进度整数、结果行与耗时，状态信息交给日志；
/// `Json` 格式下每条消息一行 JSON。
pub struct Reporter<W: Write> {
    format: ReportFormat,
    out: W,
}

impl<W: Write> Reporter<W> {
    pub fn new(
        format: ReportFormat,
        out: W,
    ) -> Self {
        Self { format, out }
    }

    pub fn progress(
        &mut self,
        step: usize,
        executed: u64,
    ) {
        match self.format {
            ReportFormat::Plain => self.line(&executed.to_string()),
            ReportFormat::Json => self.message(
                MessageKind::Progress,
                serde_json::json!({ "step": step, "executed": executed }),
            ),
        }
    }

    pub fn status(
        &mut self,
        message: &str,
    ) {
        if self.format == ReportFormat::Json {
            self.message(MessageKind::Status, serde_json::json!({ "message": message }));
        }
    }

    pub fn error(
        &mut self,
        severity: &str,
        message: &str,
    ) {
        match self.format {
            ReportFormat::Plain => self.line(&format!("{}: {}", severity, message)),
            ReportFormat::Json => self.message(
                MessageKind::Error,
                serde_json::json!({ "severity": severity, "message": message }),
            ),
        }
    }

    /// 输出查询结果，返回行数
    pub fn rows(
        &mut self,
        cursor: RowCursor,
    ) -> u64 {
        match self.format {
            ReportFormat::Plain => match dump(cursor, &mut self.out) {
                Ok(rows) => rows,
                Err(e) => {
                    tracing::warn!("输出结果失败: {}", e);
                    0
                }
            },
            ReportFormat::Json => {
                let cols = cursor.columns().to_vec();
                let rows: Vec<Vec<serde_json::Value>> = cursor
                    .map(|row| {
                        row.into_iter()
                            .map(|v| v.map(serde_json::Value::String).unwrap_or(serde_json::Value::Null))
                            .collect()
                    })
                    .collect();
                let count = rows.len() as u64;
                self.message(MessageKind::Rows, serde_json::json!({ "cols": cols, "rows": rows }));
                count
            }
        }
    }

    pub fn count(
        &mut self,
        rows: u64,
    ) {
        match self.format {
            ReportFormat::Plain => self.line(&rows.to_string()),
            ReportFormat::Json => self.message(MessageKind::Rows, serde_json::json!({ "count": rows })),
        }
    }

    pub fn cost(
        &mut self,
        elapsed: Duration,
    ) {
        match self.format {
            ReportFormat::Plain => self.line(&format!("Cost {:.3} s.", elapsed.as_secs_f64())),
            ReportFormat::Json => self.message(
                MessageKind::Status,
                serde_json::json!({ "elapsed_seconds": format!("{:.3}", elapsed.as_secs_f64()) }),
            ),
        }
    }

    pub fn completed(
        &mut self,
        data: serde_json::Value,
    ) {
        if self.format == ReportFormat::Json {
            self.message(MessageKind::Completed, data);
        }
    }

    /// 一次性命令的结果：纯文本输出 `plain`，JSON 输出 completed 消息
    pub fn finish(
        &mut self,
        plain: &str,
        data: serde_json::Value,
    ) {
        match self.format {
            ReportFormat::Plain => self.line(plain),
            ReportFormat::Json => self.message(MessageKind::Completed, data),
        }
    }

    fn message(
        &mut self,
        kind: MessageKind,
        data: serde_json::Value,
    ) {
        let msg = ProgressMessage { kind, data };
        if let Ok(json) = serde_json::to_string(&msg) {
            self.line(&json);
        }
    }

    fn line(
        &mut self,
        text: &str,
    ) {
        if let Err(e) = writeln!(self.out, "{}", text).and_then(|_| self.out.flush()) {
            tracing::warn!("写入输出失败: {}", e);
        }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }
}
