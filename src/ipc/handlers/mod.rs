pub mod core;
pub mod records;
pub mod structure;
pub mod sync;
pub mod workbook;
