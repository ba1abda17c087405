use std::{fs, path::Path};

use serde::Deserialize;

use sqlrun_core::{BatchError, BatchOptions, DataSourceOptions, OnError, SourceStore, StatementSource};

/// 输出格式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportFormat {
    /// 纯文本：进度为裸整数，结果按行输出
    #[default]
    Plain,
    /// JSON Lines
    Json,
}

/// 查询结果输出方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DumpMode {
    #[default]
    Rows,
    Count,
}

/// 执行 SQL 文件配置
#[derive(Debug, Deserialize)]
pub struct ExecConfig {
    pub file: String,
    #[serde(flatten)]
    pub batch: BatchOptions,
}

/// 查询配置，`sql` 与 `file` 二选一
#[derive(Debug, Deserialize)]
pub struct QueryConfig {
    pub sql: Option<String>,
    pub file: Option<String>,
    #[serde(default)]
    pub mode: DumpMode,
    #[serde(default)]
    pub on_error: OnError,
}

impl QueryConfig {
    /// 取得查询语句；来自文件时整个文件为一条语句
    pub fn statement(&self) -> Result<String, BatchError> {
        match (&self.sql, &self.file) {
            (Some(sql), _) => Ok(sql.clone()),
            (None, Some(file)) => fs::read_to_string(file).map_err(|source| BatchError::SourceRead {
                path: file.clone(),
                source,
            }),
            (None, None) => Ok(String::new()),
        }
    }

    pub fn source_name(&self) -> String {
        match (&self.sql, &self.file) {
            (Some(_), _) | (None, None) => "<sql>".into(),
            (None, Some(file)) => StatementSource::File(file.into()).name(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Exec(ExecConfig),
    Query(QueryConfig),
}

impl Step {
    pub fn on_error(&self) -> OnError {
        match self {
            Step::Exec(config) => config.batch.on_error,
            Step::Query(config) => config.on_error,
        }
    }
}

/// 统一的任务配置
#[derive(Deserialize)]
pub struct TaskConfig {
    pub task_id: String,
    #[serde(default)]
    pub created_at: Option<String>,

    // 数据源：内联配置优先，其次按 id 从加密存储读取
    #[serde(default)]
    pub source_id: Option<String>,
    #[serde(default)]
    pub source: Option<DataSourceOptions>,

    #[serde(default)]
    pub report: ReportFormat,
    /// 关闭会话前发送给数据库的命令，例如 `SHUTDOWN`
    #[serde(default)]
    pub shutdown: Option<String>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl TaskConfig {
    pub fn load(task_dir: &Path) -> Result<Self, String> {
        let config_path = task_dir.join("config.json");
        let content = fs::read_to_string(&config_path).map_err(|e| format!("无法读取配置文件: {}", e))?;
        let config: Self = serde_json::from_str(&content).map_err(|e| format!("配置文件格式错误: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        for (idx, step) in self.steps.iter().enumerate() {
            if let Step::Query(query) = step {
                if query.sql.is_some() == query.file.is_some() {
                    return Err(format!("第 {} 步: 查询需要且只能配置 sql 或 file 之一", idx + 1));
                }
            }
        }
        Ok(())
    }

    /// 解析数据源配置
    pub fn resolve_source(&self) -> Result<DataSourceOptions, String> {
        if let Some(options) = &self.source {
            return Ok(options.clone());
        }

        let Some(id) = &self.source_id else {
            return Err("未配置数据源（source 或 source_id）".into());
        };

        tracing::info!("加载数据源: {}", id);
        let store = SourceStore::init().map_err(|e| format!("无法读取数据源存储: {}", e))?;
        store
            .find(id)
            .map(|s| s.options.clone())
            .ok_or_else(|| format!("数据源不存在: {}", id))
    }
}
