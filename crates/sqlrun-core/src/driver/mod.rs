use crate::DataSourceOptions;

pub use self::mysql::MySQLDriver;
pub use self::postgres::PostgresDriver;
pub use self::sqlite::SQLiteDriver;

mod mysql;
mod postgres;
mod sqlite;

#[cfg(test)]
pub(crate) mod recording;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecResp {
    pub affected: u64,
}

/// 查询结果：列名 + 按列顺序排列的文本值，`None` 表示 SQL NULL
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueryResp {
    pub cols: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("{0}")]
    Other(String),
    /// 连接已断开，后续语句都不会成功
    #[error("连接已断开: {0}")]
    Connection(String),
    #[error("配置字段缺失: {0}")]
    MissingField(String),
    #[error("配置字段非法: {0}")]
    InvalidField(String),
}

pub trait DatabaseDriver {
    type Config;

    fn check_connection(
        &self,
        config: &Self::Config,
    ) -> Result<(), DriverError>;

    fn create_connection(
        &self,
        config: &Self::Config,
    ) -> Result<Box<dyn DatabaseSession>, DriverError>;
}

pub trait DatabaseSession: Send {
    fn exec(
        &mut self,
        sql: &str,
    ) -> Result<ExecResp, DriverError>;

    fn query(
        &mut self,
        sql: &str,
    ) -> Result<QueryResp, DriverError>;

    /// 有序关闭底层连接
    fn close(self: Box<Self>) -> Result<(), DriverError>;
}

pub fn check_connection(opts: &DataSourceOptions) -> Result<(), DriverError> {
    match opts {
        DataSourceOptions::MySQL(config) => MySQLDriver.check_connection(config),
        DataSourceOptions::Postgres(config) => PostgresDriver.check_connection(config),
        DataSourceOptions::SQLite(config) => SQLiteDriver.check_connection(config),
    }
}

pub fn create_connection(opts: &DataSourceOptions) -> Result<Box<dyn DatabaseSession>, DriverError> {
    match opts {
        DataSourceOptions::MySQL(config) => MySQLDriver.create_connection(config),
        DataSourceOptions::Postgres(config) => PostgresDriver.create_connection(config),
        DataSourceOptions::SQLite(config) => SQLiteDriver.create_connection(config),
    }
}

pub fn validate_sql(sql: &str) -> Result<(), DriverError> {
    if sql.trim().is_empty() {
        return Err(DriverError::InvalidField("sql".into()));
    }
    Ok(())
}

/// Blob 显示为十六进制字符串
pub(crate) fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
