//! External decoder supervision
//!
//! Decoder programs (dump1090, rtl_433, direwolf, multimon-ng, dsd-fme,
//! trunk-recorder) run as child processes; their output is parsed on reader
//! threads into bounded per-pipeline buffers.

mod event;
pub mod parser;
mod pipeline;
mod process;
mod ring;
mod runner;

pub use event::{DecodedEvent, Payload};
pub use parser::LineParser;
pub use pipeline::{
    DecoderPipeline, InputMode, Launch, PipelineState, PipelineStatus, PollMode, Prepare,
    Transport, TuningInfo, DEFAULT_STOP_GRACE, UDP_PORT_PLACEHOLDER,
};
pub use process::Stage;
pub use ring::{AudioBuffer, EventRing, AUDIO_BUFFER_KEEP, AUDIO_BUFFER_LIMIT};
