pub mod error;
pub mod journal;
pub mod record;
pub mod schema;
pub mod storage;
pub mod value;

pub use error::{ApiError, ErrorKind};
pub use journal::{ChangeJournal, JournalCursor, JournalPosition};
pub use record::{JournalEvent, Record, RecordKey, StoredRecord, now_ms};
pub use schema::{FieldDef, FieldKind, Schema};
pub use storage::{KeyedStore, StoreFactory, StoreHandle};
pub use value::Value;
