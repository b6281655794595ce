//! Network transports for AI providers.

pub mod http;

pub use http::{HttpProvider, ProviderConfig};
