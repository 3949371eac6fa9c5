//! HTTP access to remote repositories.

mod client;

pub use client::{HttpClient, HttpClientConfig, HttpError};
pub(crate) use client::DEFAULT_USER_AGENT;
