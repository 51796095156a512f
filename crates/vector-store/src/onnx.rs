use crate::error::{Result, VectorStoreError};
use crate::local::{ModelSpec, Pooling};
use image::imageops::FilterType;
use ndarray::{Array, Array4, ArrayD, Axis, Dimension, Ix2, Ix3};
use ort::execution_providers::CPUExecutionProvider;
use ort::session::{builder::GraphOptimizationLevel, Input, Session, SessionInputs};
use ort::tensor::TensorElementType;
use ort::value::{DynTensor, Tensor};
use ort::Error as OrtError;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use tokenizers::{Tokenizer, TruncationParams};

/// ImageNet channel statistics used by the DINOv2 family.
pub(crate) const IMAGE_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub(crate) const IMAGE_STD: [f32; 3] = [0.229, 0.224, 0.225];

pub(crate) struct TextEncoder {
    id: String,
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    max_length: usize,
    pooling: Pooling,
}

pub(crate) struct ImageEncoder {
    id: String,
    session: Mutex<Session>,
    image_size: u32,
    pooling: Pooling,
}

fn default_ort_threads() -> (usize, usize) {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let intra_threads = if cpus <= 4 {
        1
    } else if cpus <= 12 {
        2
    } else {
        4
    };
    (intra_threads, 1)
}

fn open_session(model_id: &str, model_path: &Path) -> Result<Session> {
    if !model_path.exists() {
        return Err(VectorStoreError::EmbeddingError(format!(
            "Model file for '{model_id}' is missing. Expected ONNX at {}",
            model_path.display()
        )));
    }
    let (intra_threads, inter_threads) = default_ort_threads();
    let session = Session::builder()
        .map_err(|e| to_embedding_error(&e))?
        .with_intra_threads(intra_threads)
        .map_err(|e| {
            VectorStoreError::EmbeddingError(format!("Failed to set ORT intra threads: {e}"))
        })?
        .with_inter_threads(inter_threads)
        .map_err(|e| {
            VectorStoreError::EmbeddingError(format!("Failed to set ORT inter threads: {e}"))
        })?
        .with_execution_providers([CPUExecutionProvider::default().build()])
        .map_err(|e| {
            VectorStoreError::EmbeddingError(format!(
                "Failed to register CPU execution provider: {e}"
            ))
        })?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| {
            VectorStoreError::EmbeddingError(format!("Failed to set optimization level: {e}"))
        })?
        .commit_from_file(model_path)
        .map_err(|e| VectorStoreError::EmbeddingError(format!("Failed to load ONNX model: {e}")))?;
    Ok(session)
}

impl TextEncoder {
    pub(crate) fn new(spec: &ModelSpec) -> Result<Self> {
        if !tokenizers::utils::parallelism::is_parallelism_configured() {
            tokenizers::utils::parallelism::set_parallelism(false);
        }
        let tokenizer_path = spec.tokenizer_path.as_deref().ok_or_else(|| {
            VectorStoreError::EmbeddingError(format!("Text model '{}' has no tokenizer", spec.id))
        })?;
        if !tokenizer_path.exists() {
            return Err(VectorStoreError::EmbeddingError(format!(
                "Tokenizer for '{}' is missing at {}",
                spec.id,
                tokenizer_path.display()
            )));
        }
        let mut tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| VectorStoreError::EmbeddingError(format!("Tokenizer load failed: {e}")))?;
        tokenizer.with_padding(None);
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: spec.max_length,
                ..TruncationParams::default()
            }))
            .map_err(|e| {
                VectorStoreError::EmbeddingError(format!("Tokenizer truncation failed: {e}"))
            })?;

        let session = open_session(&spec.id, &spec.onnx_path)?;
        log::info!(
            "Loaded text model '{}' (dim {}, max_length {})",
            spec.id,
            spec.dimension,
            spec.max_length
        );
        Ok(Self {
            id: spec.id.clone(),
            session: Mutex::new(session),
            tokenizer,
            max_length: spec.max_length,
            pooling: spec.pooling,
        })
    }

    pub(crate) fn embed_blocking(&self, text: &str) -> Result<Vec<f32>> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| VectorStoreError::EmbeddingError(format!("Tokenization failed: {e}")))?;
        let seq_len = encoding.len();
        if seq_len == 0 || seq_len > self.max_length {
            return Err(VectorStoreError::EmbeddingError(format!(
                "Tokenized length {seq_len} outside 1..={}",
                self.max_length
            )));
        }

        let ids: Vec<i64> = encoding.get_ids().iter().map(|v| i64::from(*v)).collect();
        let mask: Vec<i64> = encoding
            .get_attention_mask()
            .iter()
            .map(|v| i64::from(*v))
            .collect();
        let type_ids: Vec<i64> = encoding.get_type_ids().iter().map(|v| i64::from(*v)).collect();

        let ids_array = Array::from_shape_vec((1, seq_len), ids)
            .map_err(|e| VectorStoreError::EmbeddingError(format!("IDs shape error: {e}")))?;
        let mask_array = Array::from_shape_vec((1, seq_len), mask.clone())
            .map_err(|e| VectorStoreError::EmbeddingError(format!("Mask shape error: {e}")))?;
        let type_array = Array::from_shape_vec((1, seq_len), type_ids)
            .map_err(|e| VectorStoreError::EmbeddingError(format!("Types shape error: {e}")))?;
        let ids_shape = ids_array.raw_dim().into_dyn();

        let mut available: HashMap<String, DynTensor> = HashMap::new();
        available.insert(
            "input_ids".to_string(),
            Tensor::from_array(ids_array.into_dyn())
                .map_err(|e| to_embedding_error(&e))?
                .upcast(),
        );
        available.insert(
            "attention_mask".to_string(),
            Tensor::from_array(mask_array.into_dyn())
                .map_err(|e| to_embedding_error(&e))?
                .upcast(),
        );
        available.insert(
            "token_type_ids".to_string(),
            Tensor::from_array(type_array.into_dyn())
                .map_err(|e| to_embedding_error(&e))?
                .upcast(),
        );

        let array = {
            let mut session = self.session.lock().map_err(|_| {
                VectorStoreError::EmbeddingError(format!("Failed to lock session for '{}'", self.id))
            })?;
            let mut feed: HashMap<String, DynTensor> = HashMap::new();
            for input in &session.inputs {
                let key = input.name.clone();
                if let Some(value) = available.remove(&key) {
                    feed.insert(key, value);
                } else {
                    let zeros = zero_tensor(&ids_shape, input)?;
                    feed.insert(key, zeros);
                }
            }
            run_first_output(&mut session, feed)?
        };

        pooled(array, &mask, self.pooling)
    }
}

impl ImageEncoder {
    pub(crate) fn new(spec: &ModelSpec) -> Result<Self> {
        if spec.image_size == 0 {
            return Err(VectorStoreError::EmbeddingError(format!(
                "Image model '{}' has image_size 0",
                spec.id
            )));
        }
        let session = open_session(&spec.id, &spec.onnx_path)?;
        log::info!(
            "Loaded image model '{}' (dim {}, input {}px)",
            spec.id,
            spec.dimension,
            spec.image_size
        );
        Ok(Self {
            id: spec.id.clone(),
            session: Mutex::new(session),
            image_size: spec.image_size,
            pooling: spec.pooling,
        })
    }

    pub(crate) fn embed_blocking(&self, bytes: &[u8]) -> Result<Vec<f32>> {
        let pixels = preprocess_image(bytes, self.image_size)?;
        let tensor = Tensor::from_array(pixels.into_dyn())
            .map_err(|e| to_embedding_error(&e))?
            .upcast();

        let array = {
            let mut session = self.session.lock().map_err(|_| {
                VectorStoreError::EmbeddingError(format!("Failed to lock session for '{}'", self.id))
            })?;
            let name = session
                .inputs
                .first()
                .map_or_else(|| "pixel_values".to_string(), |input| input.name.clone());
            let mut feed: HashMap<String, DynTensor> = HashMap::new();
            feed.insert(name, tensor);
            run_first_output(&mut session, feed)?
        };

        pooled(array, &[], self.pooling)
    }
}

fn run_first_output(session: &mut Session, feed: HashMap<String, DynTensor>) -> Result<ArrayD<f32>> {
    let outputs = session
        .run(SessionInputs::from(feed))
        .map_err(|e| VectorStoreError::EmbeddingError(format!("ONNX forward failed: {e}")))?;
    if outputs.len() == 0 {
        return Err(VectorStoreError::EmbeddingError(
            "ONNX returned no outputs".to_string(),
        ));
    }
    let array = outputs[0]
        .try_extract_array::<f32>()
        .map_err(|e| VectorStoreError::EmbeddingError(format!("Failed to decode ONNX output: {e}")))?
        .to_owned();
    Ok(array)
}

/// Reduce a single-sample output to one vector. `mask` is only consulted for mean
/// pooling; an empty mask counts every position.
fn pooled(array: ArrayD<f32>, mask: &[i64], pooling: Pooling) -> Result<Vec<f32>> {
    match array.ndim() {
        2 => {
            let rows = array
                .into_dimensionality::<Ix2>()
                .map_err(|e| VectorStoreError::EmbeddingError(format!("Bad output shape: {e}")))?;
            rows.outer_iter()
                .next()
                .map(|row| row.to_vec())
                .ok_or_else(|| VectorStoreError::EmbeddingError("Empty ONNX output".to_string()))
        }
        3 => {
            let hidden = array
                .into_dimensionality::<Ix3>()
                .map_err(|e| VectorStoreError::EmbeddingError(format!("Bad output shape: {e}")))?;
            let sample = hidden
                .outer_iter()
                .next()
                .ok_or_else(|| VectorStoreError::EmbeddingError("Empty ONNX output".to_string()))?;
            match pooling {
                Pooling::Cls => sample
                    .outer_iter()
                    .next()
                    .map(|token| token.to_vec())
                    .ok_or_else(|| {
                        VectorStoreError::EmbeddingError("ONNX output has no tokens".to_string())
                    }),
                Pooling::Mean => Ok(mean_pool(sample, mask)),
            }
        }
        _ => Err(VectorStoreError::EmbeddingError(format!(
            "Unexpected ONNX output dims: {:?}",
            array.shape()
        ))),
    }
}

fn mean_pool(sample: ndarray::ArrayView2<'_, f32>, mask: &[i64]) -> Vec<f32> {
    let hidden = sample.len_of(Axis(1));
    let mut sum = vec![0.0f32; hidden];
    let mut count = 0.0f32;
    for (token_idx, token) in sample.outer_iter().enumerate() {
        if !mask.is_empty() && *mask.get(token_idx).unwrap_or(&0) == 0 {
            continue;
        }
        count += 1.0;
        for (dim, value) in token.iter().enumerate() {
            sum[dim] += value;
        }
    }
    if count > 0.0 {
        for value in &mut sum {
            *value /= count;
        }
    }
    sum
}

/// Decode, resize the shorter side to `size`, center-crop to `size x size` and
/// normalize with ImageNet statistics into an NCHW tensor.
pub(crate) fn preprocess_image(bytes: &[u8], size: u32) -> Result<Array4<f32>> {
    let decoded = image::load_from_memory(bytes)
        .map_err(|e| VectorStoreError::EmbeddingError(format!("Image decode failed: {e}")))?;
    let (width, height) = (decoded.width(), decoded.height());
    if width == 0 || height == 0 {
        return Err(VectorStoreError::EmbeddingError(
            "Image has zero area".to_string(),
        ));
    }

    let scale = f64::from(size) / f64::from(width.min(height));
    let scaled_w = ((f64::from(width) * scale).round() as u32).max(size);
    let scaled_h = ((f64::from(height) * scale).round() as u32).max(size);
    let resized = decoded.resize_exact(scaled_w, scaled_h, FilterType::CatmullRom);
    let left = (scaled_w - size) / 2;
    let top = (scaled_h - size) / 2;
    let rgb = resized.crop_imm(left, top, size, size).to_rgb8();

    let side = size as usize;
    let mut pixels = Array4::<f32>::zeros((1, 3, side, side));
    for (x, y, pixel) in rgb.enumerate_pixels() {
        for channel in 0..3 {
            let value = f32::from(pixel[channel]) / 255.0;
            pixels[[0, channel, y as usize, x as usize]] =
                (value - IMAGE_MEAN[channel]) / IMAGE_STD[channel];
        }
    }
    Ok(pixels)
}

fn to_embedding_error(error: &OrtError) -> VectorStoreError {
    VectorStoreError::EmbeddingError(format!("{error}"))
}

fn zero_tensor(shape: &ndarray::IxDyn, input: &Input) -> Result<DynTensor> {
    let tensor = match &input.input_type {
        ort::value::ValueType::Tensor { ty, .. } => match ty {
            TensorElementType::Int64 => {
                Tensor::from_array(ndarray::Array::<i64, _>::zeros(shape.clone()))
                    .map_err(|e| to_embedding_error(&e))?
                    .upcast()
            }
            TensorElementType::Float32 => {
                Tensor::from_array(ndarray::Array::<f32, _>::zeros(shape.clone()))
                    .map_err(|e| to_embedding_error(&e))?
                    .upcast()
            }
            other => {
                return Err(VectorStoreError::EmbeddingError(format!(
                    "Cannot synthesize zeros for tensor type {other:?} (input {})",
                    input.name
                )))
            }
        },
        other => {
            return Err(VectorStoreError::EmbeddingError(format!(
                "Unsupported input type for zero init: {other:?}"
            )))
        }
    };
    Ok(tensor)
}
