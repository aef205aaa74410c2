pub mod backup;
pub mod cases;
pub mod core;
pub mod dashboard;
pub mod records;
pub mod session;
pub mod setup;
pub mod students;
pub mod sync;
pub mod teachers;
