//! # Lookalike Catalog
//!
//! Collaborator contracts consumed by the retrieval core: the catalog store that
//! owns product metadata and the image resolver that turns an image reference into
//! raw bytes.
//!
//! ## Example
//!
//! ```no_run
//! use lookalike_catalog::{CatalogStore, JsonCatalogStore};
//!
//! #[tokio::main]
//! async fn main() -> lookalike_catalog::Result<()> {
//!     let store = JsonCatalogStore::open("data/products.json").await?;
//!     let snapshot = store.snapshot().await?;
//!     println!("{} products", snapshot.len());
//!     Ok(())
//! }
//! ```

mod error;
mod image;
mod item;
mod store;

pub use error::{CatalogError, Result};
pub use image::{DefaultImageResolver, ImageResolver, ImageSource};
pub use item::CatalogItem;
pub use store::{CatalogStore, JsonCatalogStore};
