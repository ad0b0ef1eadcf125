pub mod weave;

pub use weave::WeaveTimestamp;
