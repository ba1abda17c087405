use serde_json::json;
use std::fs;
use std::path::PathBuf;
use std::process::Command;

/// 示例 1：建表、批量导入，然后查询（SQLite 文件库）
fn exec_and_query() {
    let task_dir = PathBuf::from("/tmp/sqlrun-tasks/exec-demo");
    let db_file = task_dir.join("demo.db");

    // 清除上次任务的信息
    if task_dir.exists() {
        fs::remove_dir_all(&task_dir).unwrap();
    }
    fs::create_dir_all(&task_dir).unwrap();

    fs::write(
        task_dir.join("create-table.sql"),
        "CREATE TABLE category (id INTEGER PRIMARY KEY, name TEXT)\n",
    )
    .unwrap();

    let mut data = String::new();
    for i in 1..=2500 {
        if i % 10 == 0 {
            data.push_str(&format!("INSERT INTO category VALUES ({}, NULL)\n", i));
        } else {
            data.push_str(&format!("INSERT INTO category VALUES ({}, 'c{}')\n", i, i));
        }
    }
    // 短行之后的内容不会执行
    data.push_str("--\nINSERT INTO category VALUES (9999, 'ignored')\n");
    fs::write(task_dir.join("data.sql"), data).unwrap();

    let config = json!({
        "task_id": "exec-demo-001",
        "created_at": "2026-10-16T10:00:00Z",
        "source": { "SQLite": { "filepath": db_file } },
        "steps": [
            { "exec": { "file": task_dir.join("create-table.sql") } },
            { "exec": { "file": task_dir.join("data.sql"), "progress_interval": 1000 } },
            { "query": { "sql": "SELECT id, name FROM category WHERE id <= 20 ORDER BY id" } },
            { "query": { "sql": "SELECT id FROM category", "mode": "count" } }
        ]
    });

    fs::write(
        task_dir.join("config.json"),
        serde_json::to_string_pretty(&config).unwrap(),
    )
    .unwrap();

    println!("配置文件已创建: {:?}/config.json", task_dir);
    println!("正在执行任务...\n");

    // 直接调用二进制执行任务
    let status = Command::new("cargo")
        .args(&["run", "-p", "sqlrun-task", "--", "--task-dir"])
        .arg(&task_dir)
        .status()
        .expect("创建任务失败");

    if status.success() {
        println!("\n✓ 任务执行成功");
    } else {
        println!("\n✗ 任务执行失败: {:?}", status.code());
    }
}

fn main() {
    println!("=== Sqlrun Task Exec 示例 ===\n");

    println!("示例 1: 建表、导入 2500 行后查询");
    println!("----------------------------------------");
    exec_and_query();
    println!();

    println!("注意:");
    println!("  1. 进度每 1000 条输出一次");
    println!("  2. NULL 值输出为 null");
    println!("  3. 日志写入任务目录下的 task.log");
}
