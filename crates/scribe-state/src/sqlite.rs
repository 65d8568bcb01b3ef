mod calendar;
mod core;
mod jobs;
mod runs;

pub use calendar::{SqliteActivityCalendar, SqliteMemoryCensus};
pub use core::SqliteDatabase;
