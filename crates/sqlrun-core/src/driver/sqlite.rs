use std::{fs, path::Path};

use rusqlite::{Connection, OpenFlags, types::ValueRef};

use crate::SQLiteOptions;

use super::{DatabaseDriver, DatabaseSession, DriverError, ExecResp, QueryResp, hex, validate_sql};

const MEMORY_PATH: &str = ":memory:";

#[derive(Debug, Clone, Copy)]
pub struct SQLiteDriver;

struct SQLiteConnection {
    conn: Connection,
}

impl SQLiteConnection {
    fn new(conn: Connection) -> Self {
        Self { conn }
    }
}

impl DatabaseSession for SQLiteConnection {
    fn exec(
        &mut self,
        sql: &str,
    ) -> Result<ExecResp, DriverError> {
        validate_sql(sql)?;
        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|err| DriverError::Other(format!("执行失败: {}", err)))?;

        // 返回结果集的语句（SELECT、PRAGMA 等）照常执行，结果丢弃
        if stmt.column_count() > 0 {
            let mut rows = stmt
                .query([])
                .map_err(|err| DriverError::Other(format!("执行失败: {}", err)))?;
            while rows
                .next()
                .map_err(|err| DriverError::Other(format!("执行失败: {}", err)))?
                .is_some()
            {}
            return Ok(ExecResp { affected: 0 });
        }

        let affected = stmt
            .execute([])
            .map_err(|err| DriverError::Other(format!("执行失败: {}", err)))?;
        Ok(ExecResp {
            affected: affected as u64,
        })
    }

    fn query(
        &mut self,
        sql: &str,
    ) -> Result<QueryResp, DriverError> {
        validate_sql(sql)?;

        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|err| DriverError::Other(format!("准备查询失败: {}", err)))?;
        let cols = stmt.column_names().iter().map(|s| s.to_string()).collect::<Vec<_>>();

        let mut rows = stmt
            .query([])
            .map_err(|err| DriverError::Other(format!("执行查询失败: {}", err)))?;

        let mut records = vec![];
        while let Some(row) = rows
            .next()
            .map_err(|err| DriverError::Other(format!("读取结果失败: {}", err)))?
        {
            let mut record = Vec::with_capacity(cols.len());
            for (idx, name) in cols.iter().enumerate() {
                let value = row
                    .get_ref(idx)
                    .map_err(|err| DriverError::Other(format!("读取列 {name} 失败: {}", err)))?;
                record.push(parse_value(value));
            }
            records.push(record);
        }

        Ok(QueryResp { cols, rows: records })
    }

    fn close(self: Box<Self>) -> Result<(), DriverError> {
        self.conn
            .close()
            .map_err(|(_, err)| DriverError::Other(format!("关闭 SQLite 失败: {}", err)))
    }
}

impl DatabaseDriver for SQLiteDriver {
    type Config = SQLiteOptions;

    fn check_connection(
        &self,
        config: &Self::Config,
    ) -> Result<(), DriverError> {
        let conn = open_conn(config)?;
        conn.query_row("SELECT 1", [], |_| Ok::<_, rusqlite::Error>(()))
            .map_err(|err| DriverError::Other(format!("校验查询失败: {}", err)))?;
        Ok(())
    }

    fn create_connection(
        &self,
        config: &Self::Config,
    ) -> Result<Box<dyn DatabaseSession>, DriverError> {
        let conn = open_conn(config)?;
        Ok(Box::new(SQLiteConnection::new(conn)))
    }
}

fn open_conn(config: &SQLiteOptions) -> Result<Connection, DriverError> {
    let path_str = config.filepath.trim();
    if path_str.is_empty() {
        return Err(DriverError::MissingField("file_path".into()));
    }

    if path_str == MEMORY_PATH {
        return Connection::open_in_memory()
            .map_err(|err| DriverError::Other(format!("打开 SQLite 失败: {}", err)));
    }

    let path = Path::new(path_str);

    if config.readonly {
        if !path.exists() {
            return Err(DriverError::InvalidField("file_path 不存在".into()));
        }
    } else if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|err| DriverError::Other(format!("创建目录失败: {}", err)))?;
        }
    }

    let flags = if config.readonly {
        OpenFlags::SQLITE_OPEN_READ_ONLY
    } else {
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
    };

    Connection::open_with_flags(path, flags).map_err(|err| DriverError::Other(format!("打开 SQLite 失败: {}", err)))
}

fn parse_value(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(int) => Some(int.to_string()),
        ValueRef::Real(real) => Some(real.to_string()),
        ValueRef::Text(text) => Some(String::from_utf8_lossy(text).into_owned()),
        ValueRef::Blob(blob) => Some(hex(blob)),
    }
}
