//! Result output for aqs.
//!
//! [`FsResultSink`] persists per-task, per-course and per-run artifacts as
//! JSON plus a human-readable text rendering of each, and the run's cost rows
//! as CSV.

pub mod costs;
pub mod sink;
pub mod text;

pub use costs::{cost_rows, render_cost_csv, write_cost_csv, CostRow};
pub use sink::FsResultSink;
pub use text::{render_course, render_result, render_run};
