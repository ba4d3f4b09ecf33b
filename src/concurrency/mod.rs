mod transaction;

pub use transaction::{LatchEntry, Transaction};
