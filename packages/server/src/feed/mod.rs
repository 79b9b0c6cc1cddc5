//! Feed media pipeline.

pub mod dedup;
pub mod intake;
pub mod posts;
pub mod tags;
pub mod variants;
