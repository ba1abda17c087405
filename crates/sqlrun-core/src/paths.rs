use std::{fs::create_dir_all, path::PathBuf};

/// 获取 sqlrun 根目录（~/.sqlrun）
///
/// Fallback: 如果 home_dir 失败，使用 ./.sqlrun
pub fn root_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".sqlrun"))
        .unwrap_or_else(|| PathBuf::from(".sqlrun"))
}

/// 获取数据源配置文件路径（~/.sqlrun/sources.db）
pub fn sources_db() -> PathBuf {
    root_dir().join("sources.db")
}

/// 获取任务根目录（~/.sqlrun/tasks）
pub fn tasks_dir() -> PathBuf {
    let dir = root_dir().join("tasks");
    let _ = create_dir_all(&dir);
    dir
}

/// 获取指定任务的目录（~/.sqlrun/tasks/{task_id}）
pub fn task_dir(id: &str) -> PathBuf {
    let dir = tasks_dir().join(id);
    let _ = create_dir_all(&dir);
    dir
}
