//! Transaction capability types and the scan result model.

pub mod scan;
pub mod transaction;
