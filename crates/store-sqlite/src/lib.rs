mod documents;
mod insert;
mod models;
mod open;
mod query;
mod schema;

pub use documents::SqliteStore;
pub use models::*;
pub use open::Db;

pub(crate) fn now_ms() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}
