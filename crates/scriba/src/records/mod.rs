pub mod store;
pub mod types;

pub use store::RecordStore;
pub use types::{CorrectionRecord, ImportOutcome, NewRecord};
