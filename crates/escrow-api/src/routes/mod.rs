//! Route modules, one router per resource family.

pub mod disputes;
pub mod ops;
pub mod transactions;
pub mod users;
