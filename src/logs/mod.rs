pub mod collector;
pub mod content;
pub mod reverse;

pub use collector::{CollectError, DirectoryCollector};
pub use content::{
    FileBody, FileContent, HostResult, LineLimit, LogQuery, DEFAULT_LINE_COUNT,
    UNREADABLE_FILE_MESSAGE,
};
pub use reverse::{ReverseLineReader, DEFAULT_CHUNK_SIZE, MAX_LINE_BYTES};
