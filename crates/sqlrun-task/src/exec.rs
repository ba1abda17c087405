use std::io::Write;

use sqlrun_core::{BatchError, BatchReport, Session, StatementSource, StopReason, run_from_source};

use crate::{config::ExecConfig, report::Reporter};

/// 执行 SQL 文件任务
pub fn run<W: Write>(
    session: &Session,
    config: &ExecConfig,
    step: usize,
    reporter: &mut Reporter<W>,
) -> Result<BatchReport, BatchError> {
    tracing::info!("准备执行 SQL 文件: {}", config.file);
    tracing::debug!(
        "配置: min_len={}, progress_interval={}, on_error={:?}",
        config.batch.min_len,
        config.batch.progress_interval,
        config.batch.on_error
    );
    reporter.status(&format!("执行 SQL 文件: {}", config.file));

    let source = StatementSource::File(config.file.clone().into());
    let report = run_from_source(session, source, &config.batch, |executed| reporter.progress(step, executed))?;

    if let StopReason::Sentinel { line } = report.stop {
        tracing::info!("第 {} 行为结束标记，之后的内容未执行", line);
    }
    Ok(report)
}
