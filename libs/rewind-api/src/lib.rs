pub mod cursor;
pub mod error;
pub mod event;
pub mod log;
pub mod record;
pub mod util;

pub use cursor::Cursor;
pub use error::LogError;
pub use event::{Breadcrumb, ConsoleEntry, Event, EventKind, EventPayload, NetworkExchange, RrwebFrame};
pub use log::{EventLog, StreamFilter};
pub use record::{NewRecord, Record};
pub use util::now_ms;
