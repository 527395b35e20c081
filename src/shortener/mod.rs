//! Short code to original URL mapping, in memory only

mod store;

pub use store::{generate_code, ShortUrlStore};
