use serde::{Deserialize, Serialize};

/// A product as owned by the catalog store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: String,
    pub name: String,
    pub category: String,
    pub price: f64,
    pub image_url: String,
}

impl CatalogItem {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        category: impl Into<String>,
        price: f64,
        image_url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            category: category.into(),
            price,
            image_url: image_url.into(),
        }
    }

    /// Text fed to the text encoder for this item.
    #[must_use]
    pub fn embedding_text(&self) -> String {
        format!("{} {}", self.name.trim(), self.category.trim())
            .trim()
            .to_string()
    }
}
