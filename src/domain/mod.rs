pub mod account;
pub mod market;
pub mod order;
pub mod position;
pub mod signal;

pub use account::*;
pub use market::*;
pub use order::*;
pub use position::*;
pub use signal::*;
