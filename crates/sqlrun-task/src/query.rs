use std::{io::Write, time::Instant};

use serde::Serialize;

use sqlrun_core::{BatchError, Session, count};

use crate::{
    config::{DumpMode, QueryConfig},
    report::Reporter,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuerySummary {
    pub rows: u64,
    pub elapsed_seconds: f64,
}

/// 执行查询并输出结果
pub fn run<W: Write>(
    session: &Session,
    config: &QueryConfig,
    reporter: &mut Reporter<W>,
) -> Result<QuerySummary, BatchError> {
    tracing::info!("准备执行查询: {}", config.source_name());
    let sql = config.statement()?;

    let start = Instant::now();
    let cursor = session.query(&sql)?;
    let rows = match config.mode {
        DumpMode::Rows => reporter.rows(cursor),
        DumpMode::Count => {
            let rows = count(cursor);
            reporter.count(rows);
            rows
        }
    };
    let elapsed = start.elapsed();
    reporter.cost(elapsed);

    tracing::info!("查询完成，共 {} 行，耗时 {:.3} 秒", rows, elapsed.as_secs_f64());
    Ok(QuerySummary {
        rows,
        elapsed_seconds: elapsed.as_secs_f64(),
    })
}
