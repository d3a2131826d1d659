pub mod core;
pub mod grades;
pub mod records;
pub mod setup;
pub mod stats;
