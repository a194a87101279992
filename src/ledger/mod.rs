pub mod book;
pub mod outcome;

pub use book::Ledger;
pub use outcome::{AppliedUpdate, ClosedTrade, Fill, LedgerUpdate};
