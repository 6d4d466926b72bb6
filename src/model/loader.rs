use std::path::Path;

use parking_lot::Mutex;
use tch::{Device, IValue, Kind, Tensor, no_grad};
use tokenizers::Tokenizer;
use tracing::info;

use crate::{
    config::{self, AppConfig},
    engine::{CancelFlag, EngineError, GenerationEngine, GenerationSettings, ModelIdentity},
};

const EOS_TOKEN: &str = "<|endoftext|>";
const GPT2_EOS_ID: i64 = 50256;

/// Traced causal LM plus its tokenizer. The module is not reentrant, so
/// forward passes go through a mutex.
pub struct TorchEngine {
    identity: ModelIdentity,
    tokenizer: Tokenizer,
    device: Device,
    eos_token_id: i64,
    max_input_tokens: usize,
    module: Mutex<tch::CModule>,
}

impl TorchEngine {
    pub fn load(config: &AppConfig) -> anyhow::Result<Self> {
        let device = config::parse_device(&config.device);
        let tokenizer = Tokenizer::from_file(config.tokenizer_path.as_path())
            .map_err(|e| anyhow::anyhow!("failed to load tokenizer: {e}"))?;
        let eos_token_id = tokenizer
            .token_to_id(EOS_TOKEN)
            .map(i64::from)
            .unwrap_or(GPT2_EOS_ID);

        let module = load_module(&config.model_path, device)?;
        let identity = ModelIdentity {
            name: config.model_id.clone(),
            device: config::device_label(device),
        };
        info!(model = %identity.name, device = %identity.device, "model loaded");

        Ok(Self {
            identity,
            tokenizer,
            device,
            eos_token_id,
            max_input_tokens: config.max_input_tokens,
            module: Mutex::new(module),
        })
    }

    fn encode(&self, prompt: &str) -> Result<Vec<i64>, EngineError> {
        let encoding = self
            .tokenizer
            .encode(prompt, true)
            .map_err(|e| EngineError::Tokenizer(e.to_string()))?;
        let mut ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
        ids.truncate(self.max_input_tokens);
        if ids.is_empty() {
            return Err(EngineError::Tokenizer("prompt produced no tokens".into()));
        }
        Ok(ids)
    }

    fn next_token(
        &self,
        module: &tch::CModule,
        input_ids: &[i64],
        settings: &GenerationSettings,
    ) -> Result<i64, EngineError> {
        let input = Tensor::from_slice(input_ids)
            .reshape([1, input_ids.len() as i64])
            .to(self.device);

        let output = module
            .forward_is(&[IValue::Tensor(input)])
            .map_err(|e| EngineError::Inference(e.to_string()))?;

        // Traced GPT-2 returns either bare logits or (logits, past).
        let logits = match output {
            IValue::Tensor(t) => t,
            IValue::Tuple(ref tuple) if !tuple.is_empty() => match &tuple[0] {
                IValue::Tensor(t) => t.shallow_clone(),
                _ => {
                    return Err(EngineError::Inference(
                        "expected tensor as first tuple element".into(),
                    ));
                }
            },
            _ => {
                return Err(EngineError::Inference(
                    "unexpected model output format".into(),
                ));
            }
        };

        // [1, seq_len, vocab] -> [vocab]
        let last_logits = logits.select(1, -1).squeeze().to_kind(Kind::Float);
        sample_top_k(&last_logits, settings.temperature, settings.top_k)
    }
}

impl GenerationEngine for TorchEngine {
    fn identity(&self) -> &ModelIdentity {
        &self.identity
    }

    fn generate(
        &self,
        prompt: &str,
        settings: &GenerationSettings,
        cancel: &CancelFlag,
    ) -> Result<String, EngineError> {
        let mut input_ids = self.encode(prompt)?;

        no_grad(|| {
            let module = self.module.lock();

            while input_ids.len() < settings.max_length {
                if cancel.is_cancelled() {
                    return Err(EngineError::Cancelled);
                }
                let next_token_id = self.next_token(&module, &input_ids, settings)?;
                if next_token_id == self.eos_token_id {
                    break;
                }
                input_ids.push(next_token_id);
            }

            Ok::<(), EngineError>(())
        })?;

        let ids: Vec<u32> = input_ids.iter().map(|&id| id as u32).collect();
        self.tokenizer
            .decode(&ids, true)
            .map_err(|e| EngineError::Tokenizer(e.to_string()))
    }
}

fn load_module(path: &Path, device: Device) -> anyhow::Result<tch::CModule> {
    if !path.exists() {
        anyhow::bail!("model artifact missing: {}", path.display());
    }
    let mut module = tch::CModule::load_on_device(path, device)?;
    module.set_eval();
    Ok(module)
}

/// Draws one token id from the `top_k` most likely candidates after
/// temperature scaling.
fn sample_top_k(logits: &Tensor, temperature: f64, top_k: i64) -> Result<i64, EngineError> {
    let vocab = logits.size().first().copied().unwrap_or(0);
    if vocab == 0 {
        return Err(EngineError::Inference("model returned empty logits".into()));
    }
    let k = top_k.clamp(1, vocab);

    let scaled = logits / temperature;
    let (values, indices) = scaled.topk(k, -1, true, true);
    let probs = values.softmax(-1, Kind::Float);
    let position = probs.multinomial(1, true).int64_value(&[0]);
    Ok(indices.int64_value(&[position]))
}
