use std::io::{self, Write};

use crate::session::RowCursor;

/// NULL 值的输出标记
pub const NULL_MARKER: &str = "null";

/// 逐行输出游标内容
///
/// 每行按列顺序输出，每个值后跟一个空格，行尾换行；空游标不输出任何内容。
/// 返回输出的行数。
pub fn dump<W: Write>(
    cursor: RowCursor,
    out: &mut W,
) -> io::Result<u64> {
    let mut rows = 0u64;
    for row in cursor {
        for value in &row {
            write!(out, "{} ", value.as_deref().unwrap_or(NULL_MARKER))?;
        }
        writeln!(out)?;
        rows += 1;
    }
    out.flush()?;
    Ok(rows)
}

/// 只统计行数，不输出内容
pub fn count(cursor: RowCursor) -> u64 {
    cursor.count() as u64
}
