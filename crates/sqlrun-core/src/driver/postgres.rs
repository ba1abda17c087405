use postgres::{Client, Config, NoTls, SimpleQueryMessage};

use crate::PostgresOptions;

use super::{DatabaseDriver, DatabaseSession, DriverError, ExecResp, QueryResp, validate_sql};

#[derive(Debug, Clone, Copy)]
pub struct PostgresDriver;

impl DatabaseDriver for PostgresDriver {
    type Config = PostgresOptions;

    fn check_connection(
        &self,
        config: &Self::Config,
    ) -> Result<(), DriverError> {
        let mut client = open_conn(config)?;
        client
            .simple_query("SELECT 1")
            .map_err(|err| DriverError::Other(format!("校验查询失败: {}", err)))?;
        Ok(())
    }

    fn create_connection(
        &self,
        config: &Self::Config,
    ) -> Result<Box<dyn DatabaseSession>, DriverError> {
        let client = open_conn(config)?;
        Ok(Box::new(PostgresSession::new(client)))
    }
}

struct PostgresSession {
    client: Client,
}

impl PostgresSession {
    fn new(client: Client) -> Self {
        Self { client }
    }
}

// 统一走 simple query 协议：语句无需预编译，结果值全部以文本返回
impl DatabaseSession for PostgresSession {
    fn exec(
        &mut self,
        sql: &str,
    ) -> Result<ExecResp, DriverError> {
        validate_sql(sql)?;
        let messages = self
            .client
            .simple_query(sql)
            .map_err(|err| map_err("执行失败", err))?;

        let affected = messages
            .iter()
            .map(|msg| match msg {
                SimpleQueryMessage::CommandComplete(n) => *n,
                _ => 0,
            })
            .sum();
        Ok(ExecResp { affected })
    }

    fn query(
        &mut self,
        sql: &str,
    ) -> Result<QueryResp, DriverError> {
        validate_sql(sql)?;

        let messages = self
            .client
            .simple_query(sql)
            .map_err(|err| map_err("执行查询失败", err))?;

        let mut resp = QueryResp::default();
        for msg in messages {
            match msg {
                SimpleQueryMessage::Row(row) => {
                    if resp.cols.is_empty() {
                        resp.cols = row.columns().iter().map(|c| c.name().to_string()).collect();
                    }
                    resp.rows
                        .push((0..row.len()).map(|idx| row.get(idx).map(str::to_string)).collect());
                }
                // 多语句时只保留第一个结果集
                SimpleQueryMessage::CommandComplete(_) => break,
                _ => {}
            }
        }
        Ok(resp)
    }

    fn close(self: Box<Self>) -> Result<(), DriverError> {
        self.client
            .close()
            .map_err(|err| DriverError::Other(format!("关闭连接失败: {}", err)))
    }
}

fn map_err(
    context: &str,
    err: postgres::Error,
) -> DriverError {
    if err.is_closed() {
        DriverError::Connection(format!("{}: {}", context, err))
    } else {
        DriverError::Other(format!("{}: {}", context, err))
    }
}

fn open_conn(config: &PostgresOptions) -> Result<Client, DriverError> {
    if config.host.trim().is_empty() {
        return Err(DriverError::MissingField("host".into()));
    }
    if config.username.trim().is_empty() {
        return Err(DriverError::MissingField("username".into()));
    }
    if config.use_tls {
        return Err(DriverError::Other("PostgreSQL 暂未支持 TLS 连接".into()));
    }
    let port = config
        .port
        .trim()
        .parse::<u16>()
        .map_err(|_| DriverError::InvalidField(format!("port: {}", config.port)))?;

    let mut pg_config = Config::new();
    pg_config.host(config.host.trim());
    pg_config.port(port);
    pg_config.user(config.username.trim());
    pg_config.password(config.password.as_str());
    if !config.database.trim().is_empty() {
        pg_config.dbname(config.database.trim());
    }

    pg_config
        .connect(NoTls)
        .map_err(|err| DriverError::Other(format!("连接失败: {}", err)))
}
