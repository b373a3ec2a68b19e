pub mod table;

pub use table::{JsonTableStore, TableStore};
