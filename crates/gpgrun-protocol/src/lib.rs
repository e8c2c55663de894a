pub mod event;
pub mod parser;
pub mod status;

pub use event::{NeedPassphrase, StatusEvent, UserIdHint, escape_reply, unescape};
pub use parser::StatusParser;
pub use status::StatusCode;
