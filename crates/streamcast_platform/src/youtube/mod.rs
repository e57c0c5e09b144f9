#![forbid(unsafe_code)]

pub mod feed;
mod websub;

pub use feed::{FeedEntry, parse_feed};
pub use websub::{DEFAULT_HUB_URL, WebSubClient, topic_url};
