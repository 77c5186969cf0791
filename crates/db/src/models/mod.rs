//! Row structs mapping query results, and their conversion into domain types.

pub mod gift_item;
pub mod reservation;
