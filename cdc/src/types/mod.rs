mod event;
mod gtid;

pub use event::{
    Event, EventData, EventType, GtidEvent, IMPLICIT_COMMIT_FLAG, QueryEvent, RowsEvent, RowsKind,
    TableMapEvent, XidEvent,
};
pub use gtid::{Gtid, GtidList};
