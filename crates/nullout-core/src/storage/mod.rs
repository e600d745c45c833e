pub mod models;
pub mod store;

pub use models::{Finding, FindingId, FindingState, StoredFinding};
pub use store::FindingStore;
