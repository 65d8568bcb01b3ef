mod sqlite;

pub use sqlite::{SqliteActivityCalendar, SqliteDatabase, SqliteMemoryCensus};
