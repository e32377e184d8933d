//! Table columns per resource kind.
//!
//! Each column names a record field (looked up via `Record::field`) plus a
//! label and a character width used by tabular renderers.

#![forbid(unsafe_code)]

use crate::record::Record;
use crate::ResourceKind;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnSpec {
    pub field: &'static str,
    pub label: &'static str,
    pub width: usize,
}

fn col(field: &'static str, label: &'static str, width: usize) -> ColumnSpec {
    ColumnSpec { field, label, width }
}

/// Columns for the list view of `kind`. The id column always comes first.
pub fn columns_for(kind: ResourceKind) -> Vec<ColumnSpec> {
    let mut cols = vec![col(kind.id_field(), "ID", 34)];
    match kind {
        ResourceKind::Actor => {
            cols.push(col("class_name", "CLASS", 24));
            cols.push(col("name", "NAME", 16));
            cols.push(col("state", "STATE", 20));
            cols.push(col("pid", "PID", 8));
            cols.push(col("node_id", "NODE", 16));
        }
        ResourceKind::Task => {
            cols.push(col("name", "NAME", 24));
            cols.push(col("task_type", "TYPE", 20));
            cols.push(col("state", "STATE", 24));
            cols.push(col("job_id", "JOB", 10));
            cols.push(col("node_id", "NODE", 16));
        }
        ResourceKind::Object => {
            cols.push(col("object_size", "SIZE", 10));
            cols.push(col("reference_type", "REFERENCE", 22));
            cols.push(col("task_status", "TASK STATUS", 24));
            cols.push(col("call_site", "CALLSITE", 32));
            cols.push(col("node_id", "NODE", 16));
        }
        ResourceKind::Node => {
            cols.push(col("node_ip", "IP", 16));
            cols.push(col("is_head_node", "HEAD", 6));
            cols.push(col("state", "STATE", 8));
        }
        ResourceKind::Worker => {
            cols.push(col("worker_type", "TYPE", 16));
            cols.push(col("state", "STATE", 8));
            cols.push(col("pid", "PID", 8));
            cols.push(col("node_id", "NODE", 16));
            cols.push(col("exit_type", "EXIT", 16));
        }
        ResourceKind::Job => {
            cols.push(col("job_type", "TYPE", 12));
            cols.push(col("status", "STATUS", 10));
            cols.push(col("submission_id", "SUBMISSION", 24));
            cols.push(col("entrypoint", "ENTRYPOINT", 32));
        }
        ResourceKind::PlacementGroup => {
            cols.push(col("name", "NAME", 16));
            cols.push(col("strategy", "STRATEGY", 14));
            cols.push(col("state", "STATE", 12));
            cols.push(col("creator_job_id", "JOB", 10));
        }
        ResourceKind::RuntimeEnv => {
            cols.push(col("state", "STATE", 8));
            cols.push(col("node_id", "NODE", 16));
            cols.push(col("runtime_env", "RUNTIME ENV", 40));
        }
    }
    cols
}

/// One row of cell strings for `rec`, aligned with `columns_for(rec.kind())`.
/// Unset fields render as `-`.
pub fn project_row(rec: &Record, cols: &[ColumnSpec]) -> Vec<String> {
    cols.iter().map(|c| rec.field(c.field).unwrap_or_else(|| "-".to_string())).collect()
}
