//! Image generation providers.

mod gemini;

pub use gemini::{
    api_key_from_env, GeminiModel, GeminiProvider, GeminiProviderBuilder, API_KEY_ENV_VARS,
};
