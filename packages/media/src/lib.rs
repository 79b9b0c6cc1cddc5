pub mod config;
pub mod error;
pub mod images;
pub mod ladder;
pub mod probe;
pub mod sniff;
pub mod subtitle;
pub mod transcoder;

pub use config::MediaConfig;
pub use error::MediaError;
pub use ladder::{Variant, plan_variants};
pub use probe::ProbeInfo;
pub use transcoder::{FfmpegTranscoder, Transcoder};
