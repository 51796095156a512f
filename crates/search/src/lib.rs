//! Query side of lookalike: k-NN lookups against the published index and the
//! [`ProductSearch`] facade that turns an image (plus optional text) into
//! ranked catalog items.

mod engine;
mod error;
mod request;

pub use engine::{PartialResolution, QueryEngine, Resolved, ResolvedResult, SearchResult};
pub use error::{Result, SearchError};
pub use request::{ProductSearch, SearchRequest, SearchResponse, SearchTimings, DEFAULT_K};
