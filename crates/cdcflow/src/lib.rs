use std::future::Future;
use std::pin::Pin;

pub mod api;
pub mod catalog;
pub mod changefeed;
pub mod config;
pub mod db;
pub mod errors;
pub mod jobs;
pub mod testing;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub use errors::{ChangefeedError, Result};
