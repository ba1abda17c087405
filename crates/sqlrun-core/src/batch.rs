//! 按行执行 SQL 语句
//!
//! 语句源中每行是一条完整语句，不做任何 SQL 解析。
//! 长度（字符数）小于 `min_len` 的行视为批次结束标记：该行不执行，其后的内容也不再读取。
//! 这意味着合法的短语句同样会截断批次，`min_len = 0` 可关闭该约定。

use std::{
    fs::File,
    io::{self, BufRead, BufReader, Cursor},
    path::PathBuf,
};

use serde::{Deserialize, Serialize};

use crate::session::{Session, SessionError};

pub const DEFAULT_MIN_LEN: usize = 3;
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 1000;

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("读取语句源失败 {path}: {source}")]
    SourceRead {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Session(#[from] SessionError),
    /// 批次中途停止，`report` 记录停止前的执行情况
    #[error("第 {} 条语句失败，批次中止: {source}", .report.executed)]
    Aborted {
        report: BatchReport,
        #[source]
        source: SessionError,
    },
}

impl BatchError {
    pub fn is_connection(&self) -> bool {
        match self {
            BatchError::Session(err) | BatchError::Aborted { source: err, .. } => err.is_connection(),
            BatchError::SourceRead { .. } => false,
        }
    }

    /// 中止前的部分执行结果
    pub fn report(&self) -> Option<&BatchReport> {
        match self {
            BatchError::Aborted { report, .. } => Some(report),
            _ => None,
        }
    }
}

/// 单条语句失败时的处理策略
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnError {
    Abort,
    #[default]
    Continue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchOptions {
    pub min_len: usize,
    pub progress_interval: u64,
    pub on_error: OnError,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            min_len: DEFAULT_MIN_LEN,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            on_error: OnError::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StopReason {
    /// 语句源已读完
    Exhausted,
    /// 遇到短行结束标记（行号从 1 开始）
    Sentinel { line: u64 },
    /// 该行语句失败后中止（每行一条语句，行号即已执行条数）
    Aborted { line: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub executed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub stop: StopReason,
}

pub enum StatementSource {
    File(PathBuf),
    Lines(Vec<String>),
    Text(String),
}

impl StatementSource {
    pub fn name(&self) -> String {
        match self {
            StatementSource::File(path) => path.display().to_string(),
            StatementSource::Lines(_) => "<lines>".into(),
            StatementSource::Text(_) => "<text>".into(),
        }
    }

    /// 打开语句源，逐行惰性读取
    pub fn statements(
        self,
        min_len: usize,
    ) -> Result<Statements, BatchError> {
        let name = self.name();
        let lines: Box<dyn Iterator<Item = io::Result<String>>> = match self {
            StatementSource::File(path) => {
                let file = File::open(&path).map_err(|source| BatchError::SourceRead {
                    path: name.clone(),
                    source,
                })?;
                Box::new(BufReader::new(file).lines())
            }
            StatementSource::Lines(lines) => Box::new(lines.into_iter().map(Ok)),
            StatementSource::Text(text) => Box::new(Cursor::new(text.into_bytes()).lines()),
        };

        Ok(Statements {
            name,
            lines,
            min_len,
            line: 0,
            stop: None,
        })
    }
}

/// 语句迭代器，只能消费一次
pub struct Statements {
    name: String,
    lines: Box<dyn Iterator<Item = io::Result<String>>>,
    min_len: usize,
    line: u64,
    stop: Option<StopReason>,
}

impl Statements {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 迭代结束后的停止原因；读取出错时为 `None`
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop
    }
}

impl Iterator for Statements {
    type Item = Result<String, BatchError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.stop.is_some() {
            return None;
        }

        match self.lines.next() {
            None => {
                self.stop = Some(StopReason::Exhausted);
                None
            }
            Some(Err(source)) => {
                self.stop = Some(StopReason::Exhausted);
                Some(Err(BatchError::SourceRead {
                    path: self.name.clone(),
                    source,
                }))
            }
            Some(Ok(line)) => {
                self.line += 1;
                if line.chars().count() < self.min_len {
                    tracing::debug!("第 {} 行长度小于 {}，批次结束: {:?}", self.line, self.min_len, line);
                    self.stop = Some(StopReason::Sentinel { line: self.line });
                    return None;
                }
                Some(Ok(line))
            }
        }
    }
}

/// 逐条执行语句源中的语句
///
/// 每执行 `progress_interval` 条语句回调一次 `progress`（参数为已执行条数）。
/// 语句失败按 `on_error` 处理；连接类错误总是中止批次。
pub fn run_from_source(
    session: &Session,
    source: StatementSource,
    options: &BatchOptions,
    mut progress: impl FnMut(u64),
) -> Result<BatchReport, BatchError> {
    let mut statements = source.statements(options.min_len)?;
    tracing::info!("开始执行语句源: {}", statements.name());

    let mut executed = 0u64;
    let mut succeeded = 0u64;
    let mut failed = 0u64;

    for statement in statements.by_ref() {
        let sql = statement?;
        let result = session.execute(&sql);
        executed += 1;

        match result {
            Ok(_) => succeeded += 1,
            Err(err) if err.is_connection() || options.on_error == OnError::Abort => {
                tracing::error!("第 {} 条语句失败，批次中止: {}", executed, err);
                return Err(BatchError::Aborted {
                    report: BatchReport {
                        executed,
                        succeeded,
                        failed: failed + 1,
                        stop: StopReason::Aborted { line: executed },
                    },
                    source: err,
                });
            }
            Err(err) => {
                failed += 1;
                tracing::warn!("第 {} 条语句失败，继续执行: {}", executed, err);
            }
        }

        if options.progress_interval > 0 && executed % options.progress_interval == 0 {
            progress(executed);
        }
    }

    let report = BatchReport {
        executed,
        succeeded,
        failed,
        stop: statements.stop_reason().unwrap_or(StopReason::Exhausted),
    };
    tracing::info!(
        "语句源执行完成: {}，共 {} 条，成功 {} 条，失败 {} 条",
        statements.name(),
        report.executed,
        report.succeeded,
        report.failed
    );
    Ok(report)
}

/// 执行内存中的语句列表
pub fn run_lines<I, S>(
    session: &Session,
    lines: I,
    options: &BatchOptions,
    progress: impl FnMut(u64),
) -> Result<BatchReport, BatchError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let lines = lines.into_iter().map(Into::into).collect();
    run_from_source(session, StatementSource::Lines(lines), options, progress)
}
