//! Small shared utilities.
//!
//! [`money_amount`] holds decimal amount parsing and raw/decimal asset
//! scaling, used by the ledger to convert on-chain integer units to the
//! decimal amounts stored in ledger entries.

pub mod money_amount;
