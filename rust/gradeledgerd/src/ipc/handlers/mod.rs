pub mod core;
pub mod ledger;
pub mod locks;
pub mod sync;
