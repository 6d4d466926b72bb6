use std::{
    env,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
    time::Duration,
};

#[cfg(feature = "tch-backend")]
use tch::Device;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub model_id: String,
    pub model_path: PathBuf,
    pub tokenizer_path: PathBuf,
    pub device: String,
    pub max_length: usize,
    pub max_input_tokens: usize,
    /// `None` disables the deadline.
    pub generation_timeout: Option<Duration>,
    pub max_concurrent_generations: usize,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let listen_addr = lookup("SERVER_ADDR")
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(|| SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 5001));

        let model_id = lookup("MODEL_ID").unwrap_or_else(|| "gpt2".to_string());
        let model_path =
            PathBuf::from(lookup("MODEL_PATH").unwrap_or_else(|| "models/gpt2.ts".to_string()));
        let tokenizer_path = PathBuf::from(
            lookup("TOKENIZER_PATH").unwrap_or_else(|| "models/tokenizer.json".to_string()),
        );
        let device = lookup("DEVICE").unwrap_or_else(|| "auto".to_string());

        let max_length = lookup("MAX_LENGTH")
            .and_then(|v| v.parse().ok())
            .unwrap_or(150);
        let max_input_tokens = lookup("MAX_INPUT_TOKENS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(1024);
        let generation_timeout = match lookup("GENERATION_TIMEOUT_SECS")
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(30)
        {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let max_concurrent_generations = lookup("MAX_CONCURRENT_GENERATIONS")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(1)
            .max(1);

        if max_length == 0 {
            anyhow::bail!("MAX_LENGTH must be greater than zero");
        }

        Ok(Self {
            listen_addr,
            model_id,
            model_path,
            tokenizer_path,
            device,
            max_length,
            max_input_tokens,
            generation_timeout,
            max_concurrent_generations,
        })
    }
}

/// Resolves the `DEVICE` setting. `auto` and `cuda` fall back to the CPU when
/// no CUDA device is present.
#[cfg(feature = "tch-backend")]
pub fn parse_device(raw: &str) -> Device {
    let lower = raw.trim().to_lowercase();
    if lower == "cpu" {
        Device::Cpu
    } else if lower == "auto" {
        Device::cuda_if_available()
    } else if lower.starts_with("cuda") {
        let idx = lower
            .split(':')
            .nth(1)
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(0);
        if tch::Cuda::is_available() {
            Device::Cuda(idx)
        } else {
            Device::Cpu
        }
    } else {
        Device::Cpu
    }
}

#[cfg(feature = "tch-backend")]
pub fn device_label(device: Device) -> String {
    match device {
        Device::Cuda(0) => "cuda".to_string(),
        Device::Cuda(idx) => format!("cuda:{idx}"),
        other => format!("{other:?}").to_lowercase(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_with(pairs: &[(&str, &str)]) -> anyhow::Result<AppConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_match_reference_deployment() {
        let config = config_with(&[]).unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:5001".parse().unwrap());
        assert_eq!(config.model_id, "gpt2");
        assert_eq!(config.device, "auto");
        assert_eq!(config.max_length, 150);
        assert_eq!(config.max_input_tokens, 1024);
        assert_eq!(config.generation_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.max_concurrent_generations, 1);
    }

    #[test]
    fn zero_timeout_disables_deadline() {
        let config = config_with(&[("GENERATION_TIMEOUT_SECS", "0")]).unwrap();
        assert_eq!(config.generation_timeout, None);
    }

    #[test]
    fn unparsable_values_fall_back() {
        let config = config_with(&[
            ("SERVER_ADDR", "not-an-addr"),
            ("MAX_LENGTH", "lots"),
            ("MAX_CONCURRENT_GENERATIONS", "0"),
        ])
        .unwrap();
        assert_eq!(config.listen_addr.port(), 5001);
        assert_eq!(config.max_length, 150);
        assert_eq!(config.max_concurrent_generations, 1);
    }

    #[test]
    fn zero_max_length_is_rejected() {
        assert!(config_with(&[("MAX_LENGTH", "0")]).is_err());
    }

    #[cfg(feature = "tch-backend")]
    #[test]
    fn cpu_device_label() {
        assert_eq!(device_label(parse_device("CPU")), "cpu");
        assert_eq!(device_label(parse_device("tpu")), "cpu");
    }
}
