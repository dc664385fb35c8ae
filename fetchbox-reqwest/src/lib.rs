#![doc = include_str!("../README.md")]

mod provider;

pub use provider::ReqwestProvider;

/// Re-exported so middleware clients can be built without a direct dependency.
pub use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
