use std::{fs, path::Path};

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// A recorded sequence of page allocator operations.
///
/// Has enum variants for breaking changes in the format of the trace file,
/// but [`read`] always returns the newest variant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "trace_file_version", rename_all = "snake_case")]
pub enum TraceFile {
    V1 {
        page_count: u32,
        operations: Vec<Operation>,
    },
}

/// One call into the page allocator. Allocations are named by the trace so
/// that later operations can refer to them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    Alloc {
        id: String,
        pages: u32,
        /// Allocate as many pages as are free if there's not enough.
        #[serde(default)]
        partial: bool,
    },
    /// Frees the allocation named `id`. Freeing an allocation that failed is
    /// allowed, and does nothing.
    Free { id: String },
    Reset,
}

pub fn read(path: &Path) -> anyhow::Result<TraceFile> {
    let trace = fs::read_to_string(path).context("Failed to open the trace file")?;
    let trace = serde_json::from_str(&trace).context("Failed to parse the trace file")?;

    // NOTE: When there's new versions of TraceFile, convert to the newest here
    // (the replay assumes it)

    Ok(trace)
}

pub fn write(path: &Path, trace: &TraceFile) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(trace).context("Failed to serialize the trace")?;
    fs::write(path, json).context("Failed to write the trace file")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{read, Operation, TraceFile};

    #[test]
    fn parses_v1_traces() {
        let json = r#"{
            "trace_file_version": "v1",
            "page_count": 16,
            "operations": [
                { "op": "alloc", "id": "a", "pages": 4 },
                { "op": "alloc", "id": "b", "pages": 20, "partial": true },
                { "op": "free", "id": "a" },
                { "op": "reset" }
            ]
        }"#;
        let trace: TraceFile = serde_json::from_str(json).unwrap();
        assert_eq!(
            TraceFile::V1 {
                page_count: 16,
                operations: vec![
                    Operation::Alloc {
                        id: String::from("a"),
                        pages: 4,
                        partial: false,
                    },
                    Operation::Alloc {
                        id: String::from("b"),
                        pages: 20,
                        partial: true,
                    },
                    Operation::Free {
                        id: String::from("a"),
                    },
                    Operation::Reset,
                ],
            },
            trace,
        );
    }

    #[test]
    fn rejects_unknown_versions() {
        let json = r#"{ "trace_file_version": "v0", "page_count": 1, "operations": [] }"#;
        assert!(serde_json::from_str::<TraceFile>(json).is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        let error = read(Path::new("this/trace/does/not/exist.json")).unwrap_err();
        assert_eq!("Failed to open the trace file", error.to_string());
    }
}
