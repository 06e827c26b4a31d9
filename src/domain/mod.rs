pub mod accrual;
pub mod ledger;
pub mod order;

pub use accrual::*;
pub use ledger::*;
pub use order::*;
