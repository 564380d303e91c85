//! Streaming response engine: runs a turn and writes protocol frames.

pub mod context;
pub mod frames;
pub mod sink;
pub mod state;
pub mod turn;

pub use frames::{DATA_STREAM_HEADER, DATA_STREAM_VERSION, DataEvent, DataEventKind, StreamFrame};
pub use sink::StreamSink;
pub use state::{StateTrace, TurnState};
pub use turn::{EngineSettings, TurnEngine, TurnOutcome, TurnRequest};
