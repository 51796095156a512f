use anyhow::{bail, Context, Result};
use lookalike_catalog::DefaultImageResolver;
use lookalike_indexer::{default_build_concurrency, parse_build_concurrency, BuildOptions};
use lookalike_vector_store::{
    build_provider, embedding_cache_dir, with_cache, ArtifactPaths, CacheConfig, EmbeddingBackend,
    EmbeddingConfig, ForestParams, JointEmbedder, LocalEngine, DATA_DIR_NAME, DEFAULT_LEAF_SIZE,
    DEFAULT_TREES, INDEX_FILE_NAME, MAPPING_FILE_NAME, MAX_REMOTE_RETRIES, MAX_RETRY_BACKOFF_MS,
};
use lookalike_search::DEFAULT_K;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "lookalike.toml";
pub const CONFIG_ENV: &str = "LOOKALIKE_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LookalikeConfig {
    /// JSON array of catalog products.
    pub catalog: PathBuf,
    /// Base for relative catalog image paths; defaults to the catalog's directory.
    pub image_base_dir: Option<PathBuf>,
    pub image_timeout_ms: u64,
    pub data_dir: PathBuf,
    pub index_path: Option<PathBuf>,
    pub mapping_path: Option<PathBuf>,
    pub embedding: EmbeddingConfig,
    pub cache: CacheConfig,
    pub build: BuildSettings,
    pub search: SearchSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildSettings {
    pub sample_size: Option<usize>,
    pub trees: usize,
    pub leaf_size: usize,
    pub seed: u64,
    pub concurrency: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub k: usize,
}

impl Default for LookalikeConfig {
    fn default() -> Self {
        Self {
            catalog: PathBuf::from("catalog.json"),
            image_base_dir: None,
            image_timeout_ms: 10_000,
            data_dir: PathBuf::from(DATA_DIR_NAME),
            index_path: None,
            mapping_path: None,
            embedding: EmbeddingConfig::default(),
            cache: CacheConfig::default(),
            build: BuildSettings::default(),
            search: SearchSettings::default(),
        }
    }
}

impl Default for BuildSettings {
    fn default() -> Self {
        let forest = ForestParams::default();
        Self {
            sample_size: None,
            trees: DEFAULT_TREES,
            leaf_size: DEFAULT_LEAF_SIZE,
            seed: forest.seed,
            concurrency: None,
        }
    }
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self { k: DEFAULT_K }
    }
}

impl LookalikeConfig {
    /// Read the config file: `explicit`, else `$LOOKALIKE_CONFIG`, else
    /// `./lookalike.toml` when present. Returns the path actually read.
    pub fn load(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        let env_path = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        let path = match explicit.map(Path::to_path_buf).or(env_path) {
            Some(path) => Some(path),
            None => Some(PathBuf::from(CONFIG_FILE_NAME)).filter(|p| p.is_file()),
        };
        let Some(path) = path else {
            return Ok((Self::default(), None));
        };
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config = Self::from_toml(&raw)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        Ok((config, Some(path)))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Apply `LOOKALIKE_*` overrides read through `var`.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |name: &str| var(name).filter(|v| !v.trim().is_empty());

        if let Some(value) = get("LOOKALIKE_CATALOG") {
            self.catalog = PathBuf::from(value);
        }
        if let Some(value) = get("LOOKALIKE_EMBEDDING_BACKEND") {
            self.embedding.backend = value
                .parse::<EmbeddingBackend>()
                .context("LOOKALIKE_EMBEDDING_BACKEND")?;
        }
        if let Some(value) = get("LOOKALIKE_EMBEDDING_MODE") {
            self.set_local_engine(value.parse().context("LOOKALIKE_EMBEDDING_MODE")?);
        }
        if let Some(value) = get("LOOKALIKE_REMOTE_URL") {
            self.embedding.remote.url = value;
        }
        if let Some(value) = get("LOOKALIKE_MODEL_DIR") {
            self.embedding.local.model_dir = PathBuf::from(value);
        }
        if let Some(value) = get("LOOKALIKE_INDEX_PATH") {
            self.index_path = Some(PathBuf::from(value));
        }
        if let Some(value) = get("LOOKALIKE_MAPPING_PATH") {
            self.mapping_path = Some(PathBuf::from(value));
        }
        if let Some(value) = get("LOOKALIKE_SAMPLE_SIZE") {
            let parsed = value
                .trim()
                .parse::<usize>()
                .with_context(|| format!("LOOKALIKE_SAMPLE_SIZE must be a number, got '{value}'"))?;
            self.build.sample_size = Some(parsed);
        }
        if let Some(value) = get("LOOKALIKE_BUILD_CONCURRENCY") {
            let fallback = self.build.concurrency.unwrap_or_else(default_build_concurrency);
            self.build.concurrency = Some(parse_build_concurrency(Some(&value), fallback));
        }
        Ok(())
    }

    /// The stub engine only exists on the local backend, so selecting it pins
    /// the backend too.
    pub fn set_local_engine(&mut self, engine: LocalEngine) {
        self.embedding.local.engine = engine;
        if engine == LocalEngine::Stub {
            self.embedding.backend = EmbeddingBackend::Local;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.build.sample_size == Some(0) {
            bail!("build.sample_size must be greater than 0");
        }
        if self.embedding.text_dimension == 0 || self.embedding.image_dimension == 0 {
            bail!("embedding dimensions must be greater than 0");
        }
        if self.build.trees == 0 {
            bail!("build.trees must be at least 1");
        }
        if self.build.leaf_size == 0 {
            bail!("build.leaf_size must be at least 1");
        }
        if self.search.k == 0 {
            bail!("search.k must be at least 1");
        }
        if self.embedding.backend == EmbeddingBackend::Remote
            && self.embedding.remote.url.trim().is_empty()
        {
            bail!("embedding.remote.url is required for the remote backend");
        }
        if self.embedding.remote.max_retries > MAX_REMOTE_RETRIES {
            bail!("embedding.remote.max_retries must be at most {MAX_REMOTE_RETRIES}");
        }
        if self.embedding.remote.retry_backoff_ms > MAX_RETRY_BACKOFF_MS {
            bail!("embedding.remote.retry_backoff_ms must be at most {MAX_RETRY_BACKOFF_MS}");
        }
        Ok(())
    }

    #[must_use]
    pub fn artifact_paths(&self) -> ArtifactPaths {
        ArtifactPaths::new(
            self.index_path
                .clone()
                .unwrap_or_else(|| self.data_dir.join(INDEX_FILE_NAME)),
            self.mapping_path
                .clone()
                .unwrap_or_else(|| self.data_dir.join(MAPPING_FILE_NAME)),
        )
    }

    #[must_use]
    pub fn cache_dir(&self) -> PathBuf {
        self.cache
            .dir
            .clone()
            .unwrap_or_else(|| embedding_cache_dir(&self.data_dir))
    }

    #[must_use]
    pub fn forest(&self) -> ForestParams {
        ForestParams {
            trees: self.build.trees,
            leaf_size: self.build.leaf_size,
            seed: self.build.seed,
        }
    }

    #[must_use]
    pub fn build_options(&self) -> BuildOptions {
        BuildOptions {
            sample_size: self.build.sample_size,
            concurrency: self
                .build
                .concurrency
                .unwrap_or_else(default_build_concurrency),
            forest: self.forest(),
        }
    }

    /// Embedder shared by `build` and `search`.
    pub fn joint_embedder(&self) -> Result<JointEmbedder> {
        let provider = build_provider(&self.embedding).context("Failed to start embedding backend")?;
        let provider = with_cache(provider, &self.cache, self.cache_dir());
        Ok(JointEmbedder::new(provider, self.embedding.combiner())?)
    }

    /// Resolver for catalog image references.
    pub fn catalog_images(&self) -> Result<DefaultImageResolver> {
        let base = self.image_base_dir.clone().or_else(|| {
            self.catalog
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
        });
        let resolver = self.query_images()?;
        Ok(match base {
            Some(dir) => resolver.with_base_dir(dir),
            None => resolver,
        })
    }

    /// Resolver for query images; relative paths are taken from the working directory.
    pub fn query_images(&self) -> Result<DefaultImageResolver> {
        Ok(DefaultImageResolver::with_timeout(Duration::from_millis(
            self.image_timeout_ms,
        ))?)
    }
}
