mod fetcher;
mod parser;
mod retry;

pub use fetcher::{FeedFetcher, FeedSource};
