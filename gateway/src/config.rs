use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use engine::EngineConfig;
use inference::HybridConfig;
use sb_core::types::{ModelDescriptor, ModelRole};

/// Context windows per model family. Limits are configured, not probed.
const PRIMARY_TOKEN_LIMIT: u64 = 200_000;
const EXTENDED_TOKEN_LIMIT: u64 = 1_000_000;
const FALLBACK_TOKEN_LIMIT: u64 = 1_000_000;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub gemini_api_key: String,

    #[serde(default = "default_primary_model")]
    pub primary_model: String,

    #[serde(default = "default_extended_model")]
    pub extended_model: String,

    #[serde(default = "default_fallback_model")]
    pub fallback_model: String,

    #[serde(default = "default_max_function_calls")]
    pub max_function_calls: u32,

    #[serde(default = "default_circuit_failure_threshold")]
    pub circuit_failure_threshold: u32,

    #[serde(default = "default_circuit_recovery_seconds")]
    pub circuit_recovery_seconds: u64,

    #[serde(default = "default_extended_context_threshold")]
    pub extended_context_threshold: u64,

    #[serde(default = "default_safety_fallback_text_threshold")]
    pub safety_fallback_text_threshold: usize,

    #[serde(default = "default_history_keep")]
    pub history_keep: usize,

    #[serde(default = "default_compaction_ratio")]
    pub compaction_ratio: f64,

    #[serde(default = "default_round_timeout_seconds")]
    pub round_timeout_seconds: u64,

    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_primary_model() -> String {
    "gemini-3-flash-preview".to_string()
}

fn default_extended_model() -> String {
    "gemini-2.5-pro".to_string()
}

fn default_fallback_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_max_function_calls() -> u32 {
    5
}

fn default_circuit_failure_threshold() -> u32 {
    5
}

fn default_circuit_recovery_seconds() -> u64 {
    60
}

fn default_extended_context_threshold() -> u64 {
    150_000
}

fn default_safety_fallback_text_threshold() -> usize {
    800
}

fn default_history_keep() -> usize {
    30
}

fn default_compaction_ratio() -> f64 {
    0.75
}

fn default_round_timeout_seconds() -> u64 {
    30
}

fn default_system_prompt() -> String {
    "შენ ხარ საუბარი, კვებისა და ვარჯიშის ქართულენოვანი მრჩეველი. უპასუხე ქართულად, \
     მოკლედ და კონკრეტულად. პროდუქტების ჩამონათვალი გააფორმე ნუმერაციით და ფასით ₾-ში. \
     საჭიროებისას გამოიყენე [TIP]...[/TIP] ერთი პრაქტიკული რჩევისთვის და \
     [QUICK_REPLIES] ბლოკი მომდევნო ნაბიჯებისთვის."
        .to_string()
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("BIND_ADDRESS") {
            config.bind_address = addr;
        }
        if let Ok(port) = std::env::var("PORT") {
            if let Ok(p) = port.parse() {
                config.port = p;
            }
        }
        if let Ok(key) = std::env::var("GEMINI_API_KEY") {
            config.gemini_api_key = key;
        }
        if let Ok(model) = std::env::var("PRIMARY_MODEL") {
            config.primary_model = model;
        }
        if let Ok(model) = std::env::var("EXTENDED_MODEL") {
            config.extended_model = model;
        }
        if let Ok(model) = std::env::var("FALLBACK_MODEL") {
            config.fallback_model = model;
        }
        if let Ok(value) = std::env::var("MAX_FUNCTION_CALLS") {
            if let Ok(v) = value.parse() {
                config.max_function_calls = v;
            }
        }
        if let Ok(value) = std::env::var("CIRCUIT_FAILURE_THRESHOLD") {
            if let Ok(v) = value.parse() {
                config.circuit_failure_threshold = v;
            }
        }
        if let Ok(value) = std::env::var("CIRCUIT_RECOVERY_SECONDS") {
            if let Ok(v) = value.parse() {
                config.circuit_recovery_seconds = v;
            }
        }
        if let Ok(value) = std::env::var("EXTENDED_CONTEXT_THRESHOLD") {
            if let Ok(v) = value.parse() {
                config.extended_context_threshold = v;
            }
        }
        if let Ok(value) = std::env::var("SAFETY_FALLBACK_TEXT_THRESHOLD") {
            if let Ok(v) = value.parse() {
                config.safety_fallback_text_threshold = v;
            }
        }
        if let Ok(value) = std::env::var("HISTORY_KEEP") {
            if let Ok(v) = value.parse() {
                config.history_keep = v;
            }
        }
        if let Ok(value) = std::env::var("COMPACTION_RATIO") {
            if let Ok(v) = value.parse() {
                config.compaction_ratio = v;
            }
        }
        if let Ok(value) = std::env::var("GEMINI_TIMEOUT_SECONDS") {
            if let Ok(v) = value.parse() {
                config.round_timeout_seconds = v;
            }
        }
        if let Ok(prompt) = std::env::var("SYSTEM_PROMPT") {
            config.system_prompt = prompt;
        }

        config
    }

    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(format!("{}:{}", self.bind_address, self.port).parse()?)
    }

    pub fn hybrid_config(&self) -> HybridConfig {
        HybridConfig {
            primary: ModelDescriptor {
                id: self.primary_model.clone(),
                token_limit: PRIMARY_TOKEN_LIMIT,
                role: ModelRole::Primary,
            },
            extended: ModelDescriptor {
                id: self.extended_model.clone(),
                token_limit: EXTENDED_TOKEN_LIMIT,
                role: ModelRole::Extended,
            },
            fallback: ModelDescriptor {
                id: self.fallback_model.clone(),
                token_limit: FALLBACK_TOKEN_LIMIT,
                role: ModelRole::Fallback,
            },
            circuit_failure_threshold: self.circuit_failure_threshold,
            circuit_recovery: Duration::from_secs(self.circuit_recovery_seconds),
            extended_context_threshold: self.extended_context_threshold,
            safety_text_threshold: self.safety_fallback_text_threshold,
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            system_template: self.system_prompt.clone(),
            history_keep: self.history_keep,
            max_rounds: self.max_function_calls,
            round_timeout: Duration::from_secs(self.round_timeout_seconds),
            compaction_ratio: self.compaction_ratio,
            ..EngineConfig::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            gemini_api_key: String::new(),
            primary_model: default_primary_model(),
            extended_model: default_extended_model(),
            fallback_model: default_fallback_model(),
            max_function_calls: default_max_function_calls(),
            circuit_failure_threshold: default_circuit_failure_threshold(),
            circuit_recovery_seconds: default_circuit_recovery_seconds(),
            extended_context_threshold: default_extended_context_threshold(),
            safety_fallback_text_threshold: default_safety_fallback_text_threshold(),
            history_keep: default_history_keep(),
            compaction_ratio: default_compaction_ratio(),
            round_timeout_seconds: default_round_timeout_seconds(),
            system_prompt: default_system_prompt(),
        }
    }
}
