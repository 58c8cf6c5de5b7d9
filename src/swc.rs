/// SWC skeleton text parsing
use crate::error::{ServiceError, ServiceResult};
use serde::Serialize;

pub const SWC_COLUMNS: [&str; 6] = ["rowId", "x", "y", "z", "radius", "link"];

/// Tabular skeleton: one `(rowId, x, y, z, radius, link)` row per node
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkeletonTable {
    pub columns: Vec<String>,
    pub data: Vec<(i64, f64, f64, f64, f64, i64)>,
}

fn field<T: std::str::FromStr>(raw: &str, line: usize) -> ServiceResult<T> {
    raw.parse()
        .map_err(|_| ServiceError::bad_request(format!("SWC not formatted properly (line {})", line)))
}

/// Parses SWC text; `#` lines and blank lines are skipped
pub fn parse_swc(raw: &[u8]) -> ServiceResult<SkeletonTable> {
    let text = std::str::from_utf8(raw)
        .map_err(|_| ServiceError::bad_request("SWC not formatted properly"))?;

    let mut data = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let entries: Vec<&str> = line.split_whitespace().collect();
        if entries.is_empty() || entries[0].starts_with('#') {
            continue;
        }
        if entries.len() != 7 {
            return Err(ServiceError::bad_request(format!(
                "SWC not formatted properly (line {})",
                idx + 1
            )));
        }
        let n = idx + 1;
        data.push((
            field(entries[0], n)?,
            field(entries[2], n)?,
            field(entries[3], n)?,
            field(entries[4], n)?,
            field(entries[5], n)?,
            field(entries[6], n)?,
        ));
    }

    Ok(SkeletonTable {
        columns: SWC_COLUMNS.iter().map(|c| c.to_string()).collect(),
        data,
    })
}
