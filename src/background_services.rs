pub mod archive;
pub mod clock;
pub mod feed_refresher;
pub mod feed_source;
pub mod supervisor;
