use std::{
    env,
    io::{self, Write},
    path::{Path, PathBuf},
    process::ExitCode,
};

use chrono::Utc;
use tracing_appender::{
    non_blocking,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{EnvFilter, fmt::layer, layer::SubscriberExt, util::SubscriberInitExt};

use sqlrun_core::{DataSource, DataSourceOptions, OnError, Session, SourceStore, check_connection};

use crate::{
    config::{ReportFormat, Step, TaskConfig},
    report::Reporter,
};

mod config;
mod exec;
mod query;
mod report;

const EXIT_FATAL: u8 = 1;
const EXIT_STEP_FAILED: u8 = 2;

const USAGE: &str = "用法: sqlrun-task (--task-dir <DIR> | --task-id <ID>) [--check | --save-source <NAME>]";

/// 命令行参数
#[derive(Debug, PartialEq)]
struct Args {
    task_dir: PathBuf,
    check: bool,
    save_source: Option<String>,
}

fn parse_args(args: &[String]) -> Result<Args, String> {
    let mut task_dir: Option<PathBuf> = None;
    let mut check = false;
    let mut save_source = None;

    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--task-dir" => {
                let dir = iter.next().ok_or("--task-dir 缺少目录")?;
                task_dir = Some(PathBuf::from(dir));
            }
            "--task-id" => {
                let id = iter.next().ok_or("--task-id 缺少任务 id")?;
                task_dir = Some(sqlrun_core::task_dir(id));
            }
            "--check" => check = true,
            "--save-source" => {
                let name = iter.next().ok_or("--save-source 缺少名称")?;
                save_source = Some(name.clone());
            }
            other => return Err(format!("未知参数: {}", other)),
        }
    }

    let task_dir = task_dir.ok_or("缺少 --task-dir 参数")?;
    if check && save_source.is_some() {
        return Err("--check 与 --save-source 不能同时使用".into());
    }
    Ok(Args {
        task_dir,
        check,
        save_source,
    })
}

/// 初始化任务日志系统：控制台输出到 stderr，文件写入任务目录下的 task.log
fn init_task_logging(task_dir: &Path) -> Result<non_blocking::WorkerGuard, String> {
    let log_file = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix("task")
        .filename_suffix("log")
        .build(task_dir)
        .map_err(|e| format!("无法创建日志文件: {}", e))?;
    let (non_blocking, guard) = non_blocking(log_file);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(layer().with_writer(io::stderr))
        .with(layer().with_writer(non_blocking).with_ansi(false))
        .init();

    Ok(guard)
}

/// 所有步骤的执行结果
#[derive(Default)]
struct Outcome {
    steps: Vec<serde_json::Value>,
    failed: usize,
    fatal: bool,
}

impl Outcome {
    fn exit_code(&self) -> ExitCode {
        if self.fatal {
            ExitCode::from(EXIT_FATAL)
        } else if self.failed > 0 {
            ExitCode::from(EXIT_STEP_FAILED)
        } else {
            ExitCode::SUCCESS
        }
    }
}

/// 在同一会话上依次执行各步骤
fn run_steps<W: Write>(
    session: &Session,
    steps: &[Step],
    reporter: &mut Reporter<W>,
) -> Outcome {
    let mut outcome = Outcome::default();

    for (idx, step) in steps.iter().enumerate() {
        let number = idx + 1;
        let result = match step {
            Step::Exec(config) => exec::run(session, config, number, reporter).map(|report| {
                serde_json::json!({
                    "step": number,
                    "status": "success",
                    "file": config.file,
                    "report": report,
                })
            }),
            Step::Query(config) => query::run(session, config, reporter).map(|summary| {
                serde_json::json!({
                    "step": number,
                    "status": "success",
                    "query": config.source_name(),
                    "rows": summary.rows,
                    "elapsed_seconds": format!("{:.3}", summary.elapsed_seconds),
                })
            }),
        };

        let err = match result {
            Ok(summary) => {
                outcome.steps.push(summary);
                continue;
            }
            Err(err) => err,
        };

        let fatal = err.is_connection();
        tracing::error!("第 {} 步失败: {}", number, err);
        reporter.error(if fatal { "fatal" } else { "error" }, &format!("第 {} 步失败: {}", number, err));
        outcome.failed += 1;
        outcome.steps.push(serde_json::json!({
            "step": number,
            "status": "failed",
            "message": err.to_string(),
            "report": err.report(),
        }));

        if fatal {
            outcome.fatal = true;
            break;
        }
        if step.on_error() == OnError::Abort {
            tracing::warn!("第 {} 步配置为 abort，跳过剩余 {} 步", number, steps.len() - number);
            break;
        }
    }

    outcome
}

fn save_source<W: Write>(
    mut store: SourceStore,
    name: &str,
    options: DataSourceOptions,
    reporter: &mut Reporter<W>,
) -> ExitCode {
    let source = DataSource::new(name.to_string(), options);
    let id = source.id.clone();
    let endpoint = source.display_endpoint();
    store.upsert(source);

    match store.save() {
        Ok(()) => {
            tracing::info!("数据源已保存: {} ({}) -> {}", name, endpoint, store.path().display());
            reporter.finish(&id, serde_json::json!({ "status": "success", "source_id": id, "endpoint": endpoint }));
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("保存数据源失败 {}: {}", endpoint, e);
            reporter.error("fatal", &format!("保存数据源失败: {}", e));
            ExitCode::from(EXIT_FATAL)
        }
    }
}

fn check<W: Write>(
    options: &DataSourceOptions,
    reporter: &mut Reporter<W>,
) -> ExitCode {
    let endpoint = options.endpoint();
    match check_connection(options) {
        Ok(()) => {
            tracing::info!("连接正常: {}", endpoint);
            reporter.finish("ok", serde_json::json!({ "status": "success", "endpoint": endpoint }));
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("连接失败 {}: {}", endpoint, e);
            reporter.error("fatal", &format!("连接失败 {}: {}", endpoint, e));
            ExitCode::from(EXIT_FATAL)
        }
    }
}

fn main() -> ExitCode {
    // 1. 解析命令行参数
    let raw: Vec<String> = env::args().collect();
    let args = match parse_args(&raw) {
        Ok(args) => args,
        Err(e) => {
            Reporter::new(ReportFormat::Plain, io::stdout()).error("fatal", &e);
            eprintln!("{}", USAGE);
            return ExitCode::from(EXIT_FATAL);
        }
    };

    // 2. 初始化日志系统
    let _log_guard = match init_task_logging(&args.task_dir) {
        Ok(guard) => guard,
        Err(e) => {
            Reporter::new(ReportFormat::Plain, io::stdout()).error("fatal", &e);
            return ExitCode::from(EXIT_FATAL);
        }
    };
    tracing::info!("任务进程启动，task_dir: {:?}", args.task_dir);

    // 3. 读取任务配置
    let config = match TaskConfig::load(&args.task_dir) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{}", e);
            Reporter::new(ReportFormat::Plain, io::stdout()).error("fatal", &e);
            return ExitCode::from(EXIT_FATAL);
        }
    };
    tracing::info!(
        "任务配置解析成功: task_id={}, created_at={}, steps={}",
        config.task_id,
        config.created_at.as_deref().unwrap_or("-"),
        config.steps.len()
    );
    let mut reporter = Reporter::new(config.report, io::stdout());

    // 4. 解析数据源
    let options = match config.resolve_source() {
        Ok(options) => options,
        Err(e) => {
            tracing::error!("{}", e);
            reporter.error("fatal", &e);
            return ExitCode::from(EXIT_FATAL);
        }
    };

    if let Some(name) = &args.save_source {
        return match SourceStore::init() {
            Ok(store) => save_source(store, name, options, &mut reporter),
            Err(e) => {
                tracing::error!("无法读取数据源存储: {}", e);
                reporter.error("fatal", &format!("无法读取数据源存储: {}", e));
                ExitCode::from(EXIT_FATAL)
            }
        };
    }
    if args.check {
        return check(&options, &mut reporter);
    }

    // 5. 建立数据库连接，失败时不执行任何步骤
    let session = match Session::open(&options) {
        Ok(session) => session,
        Err(e) => {
            tracing::error!("{}", e);
            reporter.error("fatal", &e.to_string());
            return ExitCode::from(EXIT_FATAL);
        }
    };
    reporter.status(&format!("已连接: {}", session.endpoint()));

    // 6. 依次执行步骤
    let outcome = run_steps(&session, &config.steps, &mut reporter);

    // 7. 关闭会话
    if let Err(e) = session.close(config.shutdown.as_deref()) {
        tracing::warn!("关闭会话失败: {}", e);
        reporter.error("warn", &format!("关闭会话失败: {}", e));
    }

    reporter.completed(serde_json::json!({
        "task_id": config.task_id,
        "status": if outcome.failed == 0 { "success" } else { "failed" },
        "steps": outcome.steps,
        "finished_at": Utc::now().to_rfc3339(),
    }));
    tracing::info!("任务结束，失败步骤 {} 个", outcome.failed);

    outcome.exit_code()
}

#[cfg(test)]
mod tests {
    use std::fs;

    use sqlrun_core::SQLiteOptions;

    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("sqlrun-task").chain(list.iter().copied()).map(String::from).collect()
    }

    fn memory_session() -> Session {
        Session::open(&DataSourceOptions::SQLite(SQLiteOptions {
            readonly: false,
            filepath: ":memory:".into(),
        }))
        .unwrap()
    }

    fn steps(value: serde_json::Value) -> Vec<Step> {
        serde_json::from_value(value).unwrap()
    }

    fn temp_dir(name: &str) -> PathBuf {
        let dir = env::temp_dir().join(format!("sqlrun-task-{}-{}", name, std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn task_dir_is_required() {
        assert!(parse_args(&args(&[])).is_err());
        assert!(parse_args(&args(&["--task-dir"])).is_err());
        assert!(parse_args(&args(&["--bogus"])).is_err());
    }

    #[test]
    fn flags_are_parsed() {
        let parsed = parse_args(&args(&["--task-dir", "/tmp/t1", "--check"])).unwrap();
        assert_eq!(
            parsed,
            Args {
                task_dir: PathBuf::from("/tmp/t1"),
                check: true,
                save_source: None,
            }
        );

        let parsed = parse_args(&args(&["--save-source", "hsql", "--task-dir", "/tmp/t1"])).unwrap();
        assert_eq!(parsed.save_source.as_deref(), Some("hsql"));

        assert!(parse_args(&args(&["--task-dir", "/tmp/t1", "--check", "--save-source", "x"])).is_err());
    }

    #[test]
    fn exec_then_query_on_one_session() {
        let dir = temp_dir("exec-query");
        let data = dir.join("data.sql");
        fs::write(
            &data,
            "CREATE TABLE t (x INT, s TEXT)\nINSERT INTO t VALUES (1, 'a')\nINSERT INTO t VALUES (2, NULL)\nxy\nINSERT INTO t VALUES (3, 'c')\n",
        )
        .unwrap();

        let session = memory_session();
        let mut reporter = Reporter::new(ReportFormat::Plain, vec![]);
        let outcome = run_steps(
            &session,
            &steps(serde_json::json!([
                {"exec": {"file": data.display().to_string()}},
                {"query": {"sql": "SELECT x, s FROM t ORDER BY x"}},
                {"query": {"sql": "SELECT x FROM t", "mode": "count"}},
            ])),
            &mut reporter,
        );
        session.close(None).unwrap();

        assert_eq!(outcome.failed, 0);
        assert_eq!(outcome.steps[0]["report"]["executed"], 3);
        assert_eq!(outcome.steps[0]["report"]["stop"]["line"], 4);
        assert_eq!(outcome.steps[2]["rows"], 2);

        let text = String::from_utf8(reporter.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "1 a ");
        assert_eq!(lines[1], "2 null ");
        assert!(lines[2].starts_with("Cost "));
        assert_eq!(lines[3], "2");

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn failed_step_continues_by_default() {
        let session = memory_session();
        let mut reporter = Reporter::new(ReportFormat::Json, vec![]);
        let outcome = run_steps(
            &session,
            &steps(serde_json::json!([
                {"query": {"sql": "SELECT * FROM missing"}},
                {"query": {"sql": "SELECT 1"}},
            ])),
            &mut reporter,
        );
        session.close(None).unwrap();

        assert_eq!(outcome.failed, 1);
        assert!(!outcome.fatal);
        assert_eq!(outcome.steps.len(), 2);
        assert_eq!(outcome.steps[1]["status"], "success");
    }

    #[test]
    fn abort_skips_remaining_steps() {
        let session = memory_session();
        let mut reporter = Reporter::new(ReportFormat::Plain, vec![]);
        let outcome = run_steps(
            &session,
            &steps(serde_json::json!([
                {"exec": {"file": "/nonexistent/sqlrun/create.sql", "on_error": "abort"}},
                {"query": {"sql": "SELECT 1"}},
            ])),
            &mut reporter,
        );
        session.close(None).unwrap();

        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.steps.len(), 1);
        assert_eq!(outcome.steps[0]["status"], "failed");
    }

    #[test]
    fn aborted_exec_keeps_partial_counts() {
        let dir = temp_dir("exec-abort");
        let data = dir.join("data.sql");
        fs::write(
            &data,
            "CREATE TABLE t (x INT)\nINSERT INTO t VALUES (1)\nINSERT INTO missing VALUES (2)\nINSERT INTO t VALUES (3)\n",
        )
        .unwrap();

        let session = memory_session();
        let mut reporter = Reporter::new(ReportFormat::Plain, vec![]);
        let outcome = run_steps(
            &session,
            &steps(serde_json::json!([
                {"exec": {"file": data.display().to_string(), "on_error": "abort"}},
                {"query": {"sql": "SELECT 1"}},
            ])),
            &mut reporter,
        );
        session.close(None).unwrap();

        assert!(!outcome.fatal);
        assert_eq!(outcome.steps.len(), 1);
        let report = &outcome.steps[0]["report"];
        assert_eq!(report["executed"], 3);
        assert_eq!(report["succeeded"], 2);
        assert_eq!(report["stop"], serde_json::json!({"kind": "aborted", "line": 3}));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn saved_source_is_reported_by_id() {
        let dir = temp_dir("save-source");
        let store = SourceStore::open(dir.join("sources.db")).unwrap();
        let options = DataSourceOptions::SQLite(SQLiteOptions {
            readonly: false,
            filepath: "/data/tpch.db".into(),
        });

        let mut reporter = Reporter::new(ReportFormat::Json, vec![]);
        assert_eq!(save_source(store, "tpch", options, &mut reporter), ExitCode::SUCCESS);

        let text = String::from_utf8(reporter.into_inner()).unwrap();
        let msg: serde_json::Value = serde_json::from_str(text.trim()).unwrap();
        assert_eq!(msg["kind"], "completed");
        assert_eq!(msg["data"]["endpoint"], "sqlite://tpch.db");

        let id = msg["data"]["source_id"].as_str().unwrap();
        let reloaded = SourceStore::open(dir.join("sources.db")).unwrap();
        assert_eq!(reloaded.find(id).unwrap().name, "tpch");

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn closed_session_is_fatal() {
        let session = memory_session();
        session.close(None).unwrap();

        let mut reporter = Reporter::new(ReportFormat::Plain, vec![]);
        let outcome = run_steps(
            &session,
            &steps(serde_json::json!([
                {"query": {"sql": "SELECT 1"}},
                {"query": {"sql": "SELECT 2"}},
            ])),
            &mut reporter,
        );

        assert!(outcome.fatal);
        assert_eq!(outcome.steps.len(), 1);
        let text = String::from_utf8(reporter.into_inner()).unwrap();
        assert!(text.starts_with("fatal: "));
    }
}
