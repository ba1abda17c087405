use mysql::{Conn, Opts, OptsBuilder, SslOpts, Value, prelude::Queryable};

use crate::MySQLOptions;

use super::{DatabaseDriver, DatabaseSession, DriverError, ExecResp, QueryResp, hex, validate_sql};

#[derive(Debug, Clone, Copy)]
pub struct MySQLDriver;

impl DatabaseDriver for MySQLDriver {
    type Config = MySQLOptions;

    fn check_connection(
        &self,
        config: &Self::Config,
    ) -> Result<(), DriverError> {
        let mut conn = open_conn(config)?;
        conn.ping()
            .map_err(|err| DriverError::Other(format!("ping 失败: {}", err)))?;
        Ok(())
    }

    fn create_connection(
        &self,
        config: &Self::Config,
    ) -> Result<Box<dyn DatabaseSession>, DriverError> {
        let conn = open_conn(config)?;
        Ok(Box::new(MySQLSession::new(conn)))
    }
}

struct MySQLSession {
    conn: Conn,
}

impl MySQLSession {
    fn new(conn: Conn) -> Self {
        Self { conn }
    }
}

impl DatabaseSession for MySQLSession {
    fn exec(
        &mut self,
        sql: &str,
    ) -> Result<ExecResp, DriverError> {
        validate_sql(sql)?;
        self.conn.query_drop(sql).map_err(|err| map_err("执行失败", err))?;
        Ok(ExecResp {
            affected: self.conn.affected_rows(),
        })
    }

    fn query(
        &mut self,
        sql: &str,
    ) -> Result<QueryResp, DriverError> {
        validate_sql(sql)?;

        let mut result = self.conn.query_iter(sql).map_err(|err| map_err("执行查询失败", err))?;

        let cols: Vec<String> = result
            .columns()
            .as_ref()
            .iter()
            .map(|col| col.name_str().to_string())
            .collect();

        let mut rows = vec![];
        // 只读取第一个结果集
        if let Some(set) = result.iter() {
            for row in set {
                let row = row.map_err(|err| map_err("读取结果失败", err))?;
                rows.push(row.unwrap().into_iter().map(parse_value).collect());
            }
        }

        Ok(QueryResp { cols, rows })
    }

    fn close(self: Box<Self>) -> Result<(), DriverError> {
        // Conn 在 drop 时发送 COM_QUIT
        drop(self.conn);
        Ok(())
    }
}

fn open_conn(config: &MySQLOptions) -> Result<Conn, DriverError> {
    if config.host.trim().is_empty() {
        return Err(DriverError::MissingField("host".into()));
    }
    if config.username.trim().is_empty() {
        return Err(DriverError::MissingField("username".into()));
    }
    let port = config
        .port
        .trim()
        .parse::<u16>()
        .map_err(|_| DriverError::InvalidField(format!("port: {}", config.port)))?;

    let mut builder = OptsBuilder::new();
    builder = builder.ip_or_hostname(Some(config.host.trim().to_string()));
    builder = builder.tcp_port(port);
    builder = builder.user(Some(config.username.clone()));
    builder = builder.pass(Some(config.password.clone()));

    let db = config.database.trim();
    if !db.is_empty() {
        builder = builder.db_name(Some(db.to_string()));
    }

    if config.use_tls {
        builder = builder.ssl_opts(Some(SslOpts::default()));
    }
    let opts = Opts::from(builder);
    Conn::new(opts).map_err(|err| DriverError::Other(format!("连接失败: {}", err)))
}

/// 网络、编解码与驱动层错误意味着连接已不可用
fn map_err(
    context: &str,
    err: mysql::Error,
) -> DriverError {
    match err {
        mysql::Error::IoError(_) | mysql::Error::CodecError(_) | mysql::Error::DriverError(_) => {
            DriverError::Connection(format!("{}: {}", context, err))
        }
        err => DriverError::Other(format!("{}: {}", context, err)),
    }
}

fn parse_value(value: Value) -> Option<String> {
    let text = match value {
        Value::NULL => return None,
        Value::Bytes(bytes) => match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(err) => hex(err.as_bytes()),
        },
        Value::Int(int) => int.to_string(),
        Value::UInt(uint) => uint.to_string(),
        Value::Float(float) => float.to_string(),
        Value::Double(double) => double.to_string(),
        Value::Date(year, month, day, hour, minute, second, 0) => {
            format!("{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}")
        }
        Value::Date(year, month, day, hour, minute, second, micros) => {
            format!("{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}.{micros:06}")
        }
        Value::Time(neg, days, hours, minutes, seconds, micros) => {
            let sign = if neg { "-" } else { "" };
            format!("{sign}{days} {hours:02}:{minutes:02}:{seconds:02}.{micros:06}")
        }
    };
    Some(text)
}
