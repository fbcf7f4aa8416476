pub mod feed_metadata;
pub mod stop;
