//! HTTP stream load client: request assembly, the submit exchange, and
//! response classification.

pub mod request;
pub mod response;
mod stream_load;

pub use request::{Destination, DestinationBuilder, DestinationBuilderError, RequestPlan};
pub use response::{LoadResult, LoadStatus, classify};
pub use stream_load::StreamLoadClient;
