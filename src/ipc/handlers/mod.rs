pub mod core;
pub mod exchange;
pub mod groups;
pub mod license;
pub mod payments;
pub mod school_years;
pub mod students;
pub mod watch;
