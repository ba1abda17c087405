use std::path::Path;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// 核心模块导出
pub mod batch;
pub mod driver;
pub mod dump;
pub mod paths;
pub mod session;
pub mod store;

pub use batch::{BatchError, BatchOptions, BatchReport, OnError, StatementSource, Statements, StopReason, run_from_source, run_lines};
pub use driver::{DatabaseDriver, DatabaseSession, DriverError, ExecResp, QueryResp, check_connection, create_connection};
pub use dump::{count, dump};
pub use paths::{root_dir, sources_db, task_dir, tasks_dir};
pub use session::{RowCursor, Session, SessionError};
pub use store::{SourceStore, StoreError};

// ============================================================================
// Model Types
// ============================================================================

#[derive(Clone, Serialize, Deserialize)]
pub struct DataSource {
    pub id: String,
    pub name: String,
    pub kind: DataSourceKind,
    pub options: DataSourceOptions,
}

impl DataSource {
    pub fn new(
        name: String,
        options: DataSourceOptions,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name,
            kind: options.kind(),
            options,
        }
    }

    pub fn display_endpoint(&self) -> String {
        self.options.endpoint()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataSourceKind {
    MySQL,
    Postgres,
    SQLite,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MySQLOptions {
    pub host: String,
    pub port: String,
    pub username: String,
    pub password: String,
    pub database: String,
    pub use_tls: bool,
}

impl Default for MySQLOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: "3306".into(),
            username: "root".into(),
            password: "".into(),
            database: String::new(),
            use_tls: false,
        }
    }
}

impl MySQLOptions {
    pub fn endpoint(&self) -> String {
        let scheme = if self.use_tls { "mysqls" } else { "mysql" };
        let db = self.database.trim();
        if db.is_empty() {
            format!("{}://{}:{}", scheme, self.host, self.port)
        } else {
            format!("{}://{}:{}/{}", scheme, self.host, self.port, db)
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PostgresOptions {
    pub host: String,
    pub port: String,
    pub database: String,
    pub username: String,
    pub password: String,
    pub use_tls: bool,
}

impl Default for PostgresOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: "5432".into(),
            database: String::new(),
            username: "postgres".into(),
            password: "".into(),
            use_tls: false,
        }
    }
}

impl PostgresOptions {
    pub fn endpoint(&self) -> String {
        let db = self.database.trim();
        let suffix = if db.is_empty() {
            String::new()
        } else {
            format!("/{}", db)
        };
        format!("postgres://{}:{}{}", self.host, self.port, suffix)
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SQLiteOptions {
    pub readonly: bool,
    pub filepath: String,
}

impl SQLiteOptions {
    pub fn endpoint(&self) -> String {
        let path = self.filepath.trim();
        if path.is_empty() {
            return "sqlite://<未配置文件>".into();
        }

        let name = Path::new(path)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(path);

        if self.readonly {
            format!("sqlite://{}?mode=ro", name)
        } else {
            format!("sqlite://{}", name)
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub enum DataSourceOptions {
    MySQL(MySQLOptions),
    Postgres(PostgresOptions),
    SQLite(SQLiteOptions),
}

impl DataSourceOptions {
    pub fn kind(&self) -> DataSourceKind {
        match self {
            DataSourceOptions::MySQL(_) => DataSourceKind::MySQL,
            DataSourceOptions::Postgres(_) => DataSourceKind::Postgres,
            DataSourceOptions::SQLite(_) => DataSourceKind::SQLite,
        }
    }

    /// 不含凭据的连接地址，用于日志与错误信息
    pub fn endpoint(&self) -> String {
        match self {
            DataSourceOptions::MySQL(opts) => opts.endpoint(),
            DataSourceOptions::Postgres(opts) => opts.endpoint(),
            DataSourceOptions::SQLite(opts) => opts.endpoint(),
        }
    }
}
