use crate::error::{CatalogError, Result};
use crate::item::CatalogItem;
use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Read-only view of the product catalog.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Every item, in the store's stable order.
    async fn snapshot(&self) -> Result<Vec<CatalogItem>>;

    /// Items for the given identities. Unknown identities are silently omitted.
    async fn get_by_ids(&self, ids: &[String]) -> Result<HashMap<String, CatalogItem>>;
}

/// Catalog backed by a JSON array of products (the seed format of the product
/// database). Snapshot order is file order.
#[derive(Debug, Clone, Default)]
pub struct JsonCatalogStore {
    source: Option<PathBuf>,
    items: Vec<CatalogItem>,
    by_id: HashMap<String, usize>,
}

impl JsonCatalogStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        log::info!("Loading catalog from {}", path.display());
        let bytes = tokio::fs::read(path).await?;
        let mut store = Self::from_json_slice(&bytes)?;
        store.source = Some(path.to_path_buf());
        log::info!("Loaded {} catalog items", store.items.len());
        Ok(store)
    }

    pub fn from_json_slice(bytes: &[u8]) -> Result<Self> {
        let raw: Value = serde_json::from_slice(bytes)?;
        let Value::Array(rows) = raw else {
            return Err(CatalogError::InvalidCatalog(
                "catalog must contain a list of product objects".to_string(),
            ));
        };

        let items = rows
            .iter()
            .enumerate()
            .map(|(idx, row)| parse_item(idx, row))
            .collect::<Result<Vec<_>>>()?;
        Self::from_items(items)
    }

    pub fn from_items(items: Vec<CatalogItem>) -> Result<Self> {
        let mut by_id = HashMap::with_capacity(items.len());
        for (idx, item) in items.iter().enumerate() {
            if item.id.is_empty() {
                return Err(CatalogError::InvalidCatalog(format!(
                    "product at index {idx} has an empty id"
                )));
            }
            if item.price.is_nan() || item.price < 0.0 {
                return Err(CatalogError::InvalidCatalog(format!(
                    "product '{}' has invalid price {}",
                    item.id, item.price
                )));
            }
            if by_id.insert(item.id.clone(), idx).is_some() {
                return Err(CatalogError::InvalidCatalog(format!(
                    "duplicate product id '{}'",
                    item.id
                )));
            }
        }
        Ok(Self {
            source: None,
            items,
            by_id,
        })
    }

    #[must_use]
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&CatalogItem> {
        self.by_id.get(id).and_then(|&idx| self.items.get(idx))
    }
}

#[async_trait]
impl CatalogStore for JsonCatalogStore {
    async fn snapshot(&self) -> Result<Vec<CatalogItem>> {
        Ok(self.items.clone())
    }

    async fn get_by_ids(&self, ids: &[String]) -> Result<HashMap<String, CatalogItem>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.get(id).map(|item| (id.clone(), item.clone())))
            .collect())
    }
}

/// One product row as it appears in the catalog file. Every key is required,
/// but presence is checked by hand so all missing keys are reported at once.
#[derive(Debug, Deserialize)]
struct CatalogRow {
    #[serde(default)]
    id: Option<RawId>,
    #[serde(default, deserialize_with = "nullable_text")]
    name: Option<String>,
    #[serde(default, deserialize_with = "nullable_text")]
    category: Option<String>,
    #[serde(default)]
    price: Option<f64>,
    #[serde(default, deserialize_with = "nullable_text")]
    image_url: Option<String>,
}

/// Seed files use both numeric and string ids; identities are strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(serde_json::Number),
}

impl RawId {
    fn into_identity(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Number(number) => number.to_string(),
        }
    }
}

/// A present key holding `null` reads as empty text.
fn nullable_text<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Some(Option::<String>::deserialize(deserializer)?.unwrap_or_default()))
}

fn parse_item(idx: usize, row: &Value) -> Result<CatalogItem> {
    let row = CatalogRow::deserialize(row).map_err(|err| {
        CatalogError::InvalidCatalog(format!("product at index {idx} is malformed: {err}"))
    })?;

    match row {
        CatalogRow {
            id: Some(id),
            name: Some(name),
            category: Some(category),
            price: Some(price),
            image_url: Some(image_url),
        } => Ok(CatalogItem {
            id: id.into_identity(),
            name,
            category,
            price,
            image_url,
        }),
        row => {
            let missing: Vec<&str> = [
                ("id", row.id.is_none()),
                ("name", row.name.is_none()),
                ("category", row.category.is_none()),
                ("price", row.price.is_none()),
                ("image_url", row.image_url.is_none()),
            ]
            .into_iter()
            .filter_map(|(key, absent)| absent.then_some(key))
            .collect();
            Err(CatalogError::InvalidCatalog(format!(
                "product at index {idx} is missing required fields: {}",
                missing.join(", ")
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const CATALOG: &str = r#"[
        {"id": 1, "name": "Linen shirt", "category": "tops", "price": 19.5, "image_url": "https://img/1.jpg"},
        {"id": "sku-2", "name": "Canvas sneaker", "category": "shoes", "price": 45, "image_url": "https://img/2.jpg"}
    ]"#;

    #[tokio::test]
    async fn parses_numeric_and_string_ids_in_file_order() {
        let store = JsonCatalogStore::from_json_slice(CATALOG.as_bytes()).unwrap();
        let snapshot = store.snapshot().await.unwrap();
        let ids: Vec<&str> = snapshot.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "sku-2"]);
        assert_eq!(snapshot[1].price, 45.0);
    }

    #[tokio::test]
    async fn get_by_ids_omits_unknown() {
        let store = JsonCatalogStore::from_json_slice(CATALOG.as_bytes()).unwrap();
        let found = store
            .get_by_ids(&["sku-2".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found["sku-2"].name, "Canvas sneaker");
    }

    #[test]
    fn rejects_missing_fields() {
        let raw = r#"[{"id": 1, "name": "x", "price": 1}]"#;
        let err = JsonCatalogStore::from_json_slice(raw.as_bytes()).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("category"), "unexpected error: {message}");
        assert!(message.contains("image_url"), "unexpected error: {message}");
    }

    #[test]
    fn rejects_duplicates_and_negative_prices() {
        let dup = vec![
            CatalogItem::new("1", "a", "c", 1.0, "u"),
            CatalogItem::new("1", "b", "c", 2.0, "u"),
        ];
        assert!(JsonCatalogStore::from_items(dup).is_err());

        let negative = vec![CatalogItem::new("1", "a", "c", -1.0, "u")];
        assert!(JsonCatalogStore::from_items(negative).is_err());
    }

    #[test]
    fn null_text_is_empty_but_bad_ids_and_prices_are_rejected() {
        let raw = r#"[{"id": 7, "name": "x", "category": null, "price": 3, "image_url": "u"}]"#;
        let store = JsonCatalogStore::from_json_slice(raw.as_bytes()).unwrap();
        assert_eq!(store.get("7").unwrap().category, "");

        let raw = r#"[{"id": [1], "name": "x", "category": "c", "price": 3, "image_url": "u"}]"#;
        let err = JsonCatalogStore::from_json_slice(raw.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("index 0"), "{err}");

        let raw = r#"[{"id": 1, "name": "x", "category": "c", "price": "cheap", "image_url": "u"}]"#;
        let err = JsonCatalogStore::from_json_slice(raw.as_bytes()).unwrap_err();
        assert!(matches!(err, CatalogError::InvalidCatalog(_)));
    }

    #[test]
    fn rejects_non_array_root() {
        let err = JsonCatalogStore::from_json_slice(br#"{"id": 1}"#).unwrap_err();
        assert!(matches!(err, CatalogError::InvalidCatalog(_)));
    }
}
