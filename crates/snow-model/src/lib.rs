// Copyright (c) 2024-2026 Snow Contributors
//
// SPDX-License-Identifier: Apache-2.0
//!
//! `snow-model` — provider adapter layer.
//!
//! Four wire dialects (chat, responses, anthropic, gemini) normalized to one
//! stream-chunk type, a generator-level retry wrapper, and a persistent
//! per-model usage log.
//!
//! ```text
//! CompletionRequest ──► ModelProvider::stream ──► Stream<StreamEvent>
//!                         ▲
//!            stream_with_retry (re-subscribes on retryable failure,
//!                               emits RetryStatus markers)
//! ```

mod anthropic;
mod chat;
mod error;
mod gemini;
mod mock;
mod provider;
mod responses;
mod retry;
mod types;
mod usage;

pub use anthropic::AnthropicProvider;
pub use chat::ChatProvider;
pub use error::StreamError;
pub use gemini::GeminiProvider;
pub use mock::MockProvider;
pub use provider::{ModelProvider, ResponseStream};
pub use responses::ResponsesProvider;
pub use retry::{stream_with_retry, RetryPolicy};
pub use types::{
    approx_tokens, parse_data_url_parts, CompletionRequest, ImagePart, Message, Role, StreamEvent,
    ToolCallAssembler, ToolCallRecord, ToolSchema,
};
pub use usage::{ModelUsage, UsageLog};

use std::sync::Arc;

use snow_config::{ProviderConfig, RequestMethod};

/// Construct the provider selected by `cfg.request_method`.
///
/// `model` is usually `cfg.advanced_model`; the compressor passes
/// `cfg.basic_or_advanced()` instead.  `extra_headers` comes from the active
/// custom-headers scheme.
pub fn from_config(
    cfg: &ProviderConfig,
    model: &str,
    extra_headers: Vec<(String, String)>,
    usage_log: Option<Arc<UsageLog>>,
) -> Arc<dyn ModelProvider> {
    match cfg.request_method {
        RequestMethod::Chat => Arc::new(ChatProvider::new(
            model.to_string(),
            cfg.api_key.clone(),
            &cfg.base_url,
            cfg.max_tokens,
            extra_headers,
            usage_log,
        )),
        RequestMethod::Responses => Arc::new(ResponsesProvider::new(
            model.to_string(),
            cfg.api_key.clone(),
            &cfg.base_url,
            cfg.max_tokens,
            cfg.responses_reasoning.clone(),
            extra_headers,
            usage_log,
        )),
        RequestMethod::Anthropic => Arc::new(AnthropicProvider::new(
            model.to_string(),
            cfg.api_key.clone(),
            &cfg.base_url,
            cfg.max_tokens,
            cfg.anthropic_beta.clone(),
            cfg.anthropic_cache_ttl.clone(),
            cfg.thinking,
            extra_headers,
            usage_log,
        )),
        RequestMethod::Gemini => Arc::new(GeminiProvider::new(
            model.to_string(),
            cfg.api_key.clone(),
            &cfg.base_url,
            cfg.max_tokens,
            cfg.gemini_thinking,
            extra_headers,
            usage_log,
        )),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_selects_dialect_by_request_method() {
        let mut cfg = ProviderConfig::default();
        cfg.advanced_model = "m".into();

        cfg.request_method = RequestMethod::Chat;
        assert_eq!(from_config(&cfg, "m", vec![], None).name(), "chat");

        cfg.request_method = RequestMethod::Responses;
        assert_eq!(from_config(&cfg, "m", vec![], None).name(), "responses");

        cfg.request_method = RequestMethod::Anthropic;
        assert_eq!(from_config(&cfg, "m", vec![], None).name(), "anthropic");

        cfg.request_method = RequestMethod::Gemini;
        assert_eq!(from_config(&cfg, "m", vec![], None).name(), "gemini");
    }

    #[test]
    fn factory_forwards_model_name() {
        let cfg = ProviderConfig::default();
        let p = from_config(&cfg, "my-model", vec![], None);
        assert_eq!(p.model_name(), "my-model");
    }
}
