use std::path::{Path, PathBuf};

pub const DATA_DIR_NAME: &str = ".lookalike";
pub const INDEX_FILE_NAME: &str = "index.json";
pub const MAPPING_FILE_NAME: &str = "mapping.json";

#[must_use]
pub fn data_dir_for_root(root: &Path) -> PathBuf {
    root.join(DATA_DIR_NAME)
}

/// Embedding cache location for a data directory.
#[must_use]
pub fn embedding_cache_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("cache").join("embeddings")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_rooted_in_the_data_dir() {
        let data = data_dir_for_root(Path::new("/srv/shop"));
        assert_eq!(data, PathBuf::from("/srv/shop/.lookalike"));
        assert_eq!(
            embedding_cache_dir(&data),
            PathBuf::from("/srv/shop/.lookalike/cache/embeddings")
        );
    }
}
