// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use super::{
    AnswerGenerator, GenerationRequest, GeneratorLoader, TokenStream, TOKEN_CHANNEL_CAPACITY,
};
use crate::config::RagConfig;
use crate::rag::errors::RagError;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use llama_cpp_2::{
    context::params::LlamaContextParams,
    llama_backend::LlamaBackend,
    llama_batch::LlamaBatch,
    model::{params::LlamaModelParams, AddBos, LlamaModel, Special},
    sampling::LlamaSampler,
};
use std::any::Any;
use std::num::NonZeroU32;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

/// Nucleus sampling cutoff applied after temperature
const TOP_P: f32 = 0.95;

/// Sanitize prompt text for tokenization
///
/// Removes characters that cause issues with C string handling in llama.cpp:
/// - Null bytes (\0) - C strings use null as terminator
/// - Other control characters that may cause issues
///
/// Retrieved context comes from PDFs, which may contain embedded null bytes.
fn sanitize_prompt_for_tokenizer(prompt: &str) -> String {
    prompt
        .chars()
        .filter(|c| {
            // Keep: tab (0x09), newline (0x0A), carriage return (0x0D)
            *c != '\0' && (*c >= ' ' || *c == '\t' || *c == '\n' || *c == '\r')
        })
        .collect()
}

/// llama.cpp allows a single backend per process
fn shared_backend() -> Result<&'static LlamaBackend> {
    static BACKEND: OnceLock<std::result::Result<LlamaBackend, String>> = OnceLock::new();

    BACKEND
        .get_or_init(|| LlamaBackend::init().map_err(|e| format!("{:?}", e)))
        .as_ref()
        .map_err(|e| anyhow!("Failed to initialize backend: {}", e))
}

/// Model loading parameters
#[derive(Debug, Clone)]
pub struct LlamaSettings {
    pub model_id: String,
    pub model_path: PathBuf,
    pub context_size: u32,
    pub gpu_layers: u32,
}

impl LlamaSettings {
    pub fn from_config(config: &RagConfig) -> Self {
        Self {
            model_id: config.generator_model_id.clone(),
            model_path: config.generator_model_path.clone(),
            context_size: config.context_size,
            gpu_layers: config.gpu_layers,
        }
    }
}

/// GGUF model served through llama.cpp
///
/// The model weights are shared; every generation creates its own context on
/// the blocking thread pool, so one instance can serve concurrent callers.
pub struct LlamaGenerator {
    model: Arc<LlamaModel>,
    settings: LlamaSettings,
}

impl LlamaGenerator {
    /// Load the model from disk (blocking)
    pub fn load(settings: LlamaSettings) -> Result<Self, RagError> {
        Self::load_inner(&settings)
            .map(|model| Self {
                model: Arc::new(model),
                settings,
            })
            .map_err(|e| RagError::GeneratorUnavailable(format!("{:#}", e)))
    }

    fn load_inner(settings: &LlamaSettings) -> Result<LlamaModel> {
        if !settings.model_path.exists() {
            return Err(anyhow!(
                "Model file not found: {}",
                settings.model_path.display()
            ));
        }

        info!(
            "Loading model {} from {} (gpu_layers={}, context_size={})",
            settings.model_id,
            settings.model_path.display(),
            settings.gpu_layers,
            settings.context_size
        );
        let start = Instant::now();

        let backend = shared_backend()?;
        let model_params = LlamaModelParams::default().with_n_gpu_layers(settings.gpu_layers);
        let model = LlamaModel::load_from_file(backend, &settings.model_path, &model_params)
            .map_err(|e| anyhow!("Failed to load model: {:?}", e))?;

        info!(
            "Model {} loaded in {:.1}s",
            settings.model_id,
            start.elapsed().as_secs_f32()
        );
        Ok(model)
    }
}

#[async_trait]
impl AnswerGenerator for LlamaGenerator {
    fn model_id(&self) -> &str {
        &self.settings.model_id
    }

    async fn generate_stream(&self, request: &GenerationRequest) -> Result<TokenStream, RagError> {
        let model = self.model.clone();
        let context_size = self.settings.context_size;
        let request = request.clone();

        Ok(spawn_token_producer(move |tx| {
            run_generation(&model, context_size, &request, tx)
        }))
    }
}

/// Run a blocking token producer on the blocking pool
///
/// An error or panic inside `produce` ends the stream with an `Err` item, so
/// consumers never mistake a crashed generation for a finished one.
fn spawn_token_producer<F>(produce: F) -> TokenStream
where
    F: FnOnce(&mpsc::Sender<Result<String, RagError>>) -> Result<()> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(TOKEN_CHANNEL_CAPACITY);

    tokio::task::spawn_blocking(move || {
        let failure = match panic::catch_unwind(AssertUnwindSafe(|| produce(&tx))) {
            Ok(Ok(())) => return,
            Ok(Err(e)) => format!("{:#}", e),
            Err(payload) => format!("generation panicked: {}", panic_message(payload.as_ref())),
        };
        warn!("Generation failed: {}", failure);
        let _ = tx.blocking_send(Err(RagError::Generation(failure)));
    });

    ReceiverStream::new(rx)
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Token loop, sending each decoded piece as soon as it is complete UTF-8.
/// Stops early when the receiver is dropped.
fn run_generation(
    model: &LlamaModel,
    context_size: u32,
    request: &GenerationRequest,
    tx: &mpsc::Sender<Result<String, RagError>>,
) -> Result<()> {
    let start_time = Instant::now();
    let backend = shared_backend()?;

    let sanitized_prompt = sanitize_prompt_for_tokenizer(&request.prompt);
    if sanitized_prompt.len() != request.prompt.len() {
        warn!(
            "Sanitized prompt: removed {} problematic bytes",
            request.prompt.len() - sanitized_prompt.len()
        );
    }

    let prompt_tokens = model
        .str_to_token(&sanitized_prompt, AddBos::Always)
        .map_err(|e| anyhow!("Failed to tokenize: {:?}", e))?;

    let n_ctx = context_size as usize;
    if prompt_tokens.is_empty() {
        return Err(anyhow!("Prompt produced no tokens"));
    }
    if prompt_tokens.len() >= n_ctx {
        return Err(anyhow!(
            "Prompt is {} tokens, context window is {}",
            prompt_tokens.len(),
            n_ctx
        ));
    }

    let ctx_params = LlamaContextParams::default()
        .with_n_ctx(NonZeroU32::new(context_size))
        .with_n_batch(context_size);

    let mut context = model
        .new_context(backend, ctx_params)
        .map_err(|e| anyhow!("Failed to create context: {:?}", e))?;

    let mut batch = LlamaBatch::new(n_ctx, 1);

    // Only the last prompt token requests logits
    for (i, &token) in prompt_tokens.iter().enumerate() {
        let is_last = i == prompt_tokens.len() - 1;
        batch
            .add(token, i as i32, &[0], is_last)
            .map_err(|e| anyhow!("Failed to add token to batch: {:?}", e))?;
    }

    context
        .decode(&mut batch)
        .map_err(|e| anyhow!("Decode failed: {:?}", e))?;

    let mut sampler = if request.temperature <= 0.0 {
        LlamaSampler::greedy()
    } else {
        LlamaSampler::chain_simple([
            LlamaSampler::temp(request.temperature),
            LlamaSampler::top_p(TOP_P, 1),
            LlamaSampler::dist(sampler_seed()),
        ])
    };

    let eos_token = model.token_eos();
    let limit = (prompt_tokens.len() + request.max_new_tokens).min(n_ctx);
    let mut n_cur = prompt_tokens.len();
    let mut pending_bytes: Vec<u8> = Vec::new();

    debug!(
        "Starting generation: prompt_tokens={}, max_new_tokens={}, limit={}",
        prompt_tokens.len(),
        request.max_new_tokens,
        limit
    );

    while n_cur < limit {
        let new_token_id = sampler.sample(&context, batch.n_tokens() - 1);

        if new_token_id == eos_token {
            debug!("EOS token after {} tokens", n_cur - prompt_tokens.len());
            break;
        }

        // Multi-byte characters can span tokens
        let bytes = model
            .token_to_bytes(new_token_id, Special::Plaintext)
            .map_err(|e| anyhow!("Failed to detokenize: {:?}", e))?;
        pending_bytes.extend_from_slice(&bytes);

        if let Some(piece) = take_complete_utf8(&mut pending_bytes) {
            if tx.blocking_send(Ok(piece)).is_err() {
                debug!("Token receiver dropped, stopping generation");
                return Ok(());
            }
        }

        batch.clear();
        batch
            .add(new_token_id, n_cur as i32, &[0], true)
            .map_err(|e| anyhow!("Failed to add token: {:?}", e))?;
        context
            .decode(&mut batch)
            .map_err(|e| anyhow!("Decode failed: {:?}", e))?;

        n_cur += 1;
    }

    if !pending_bytes.is_empty() {
        let tail = String::from_utf8_lossy(&pending_bytes).into_owned();
        let _ = tx.blocking_send(Ok(tail));
    }

    let tokens_generated = n_cur - prompt_tokens.len();
    let elapsed = start_time.elapsed();
    info!(
        "Generation ended: tokens={}, {:.1} tok/s",
        tokens_generated,
        tokens_generated as f32 / elapsed.as_secs_f32().max(1e-3)
    );

    Ok(())
}

/// Fresh seed for each sampled generation
fn sampler_seed() -> u32 {
    rand::random::<u32>()
}

/// Drain the longest valid UTF-8 prefix of `buf`
///
/// An incomplete trailing sequence stays in the buffer; invalid bytes in the
/// middle are replaced.
fn take_complete_utf8(buf: &mut Vec<u8>) -> Option<String> {
    if buf.is_empty() {
        return None;
    }

    match std::str::from_utf8(buf) {
        Ok(s) => {
            let out = s.to_string();
            buf.clear();
            Some(out)
        }
        Err(e) if e.error_len().is_none() => {
            let valid = e.valid_up_to();
            if valid == 0 {
                return None;
            }
            let rest = buf.split_off(valid);
            let out = String::from_utf8_lossy(buf).into_owned();
            *buf = rest;
            Some(out)
        }
        Err(_) => {
            let out = String::from_utf8_lossy(buf).into_owned();
            buf.clear();
            Some(out)
        }
    }
}

/// Loader producing a [`LlamaGenerator`] configured from `config`
pub fn llama_loader(config: &RagConfig) -> GeneratorLoader {
    let settings = LlamaSettings::from_config(config);
    Arc::new(move || {
        let generator = LlamaGenerator::load(settings.clone())?;
        Ok(Arc::new(generator) as Arc<dyn AnswerGenerator>)
    })
}
