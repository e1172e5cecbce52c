pub mod clock;
pub mod config;
pub mod eip;
pub mod error;
pub mod reader;
pub mod sample;
pub mod session;
pub mod sink;
pub mod stop;
pub mod tag;
pub mod trigger;

pub use config::LoggerConfig;
pub use eip::{CipTagReader, ConnectOptions};
pub use error::LoggerError;
pub use reader::TagReader;
pub use sample::{Sample, SampleAssembler};
pub use session::{Session, SessionReport};
pub use sink::{CsvSink, WritePolicy};
pub use stop::{StopReason, StopToken};
pub use tag::{ReadStatus, TagKind, TagResponse, TagSpec, TagValue};
pub use trigger::{CompareOp, Trigger};
