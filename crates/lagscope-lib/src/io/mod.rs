pub mod approvals;
pub mod csv;
pub mod unit;

pub use unit::{read_unit_csv, read_unit_from, ColumnLayout};
