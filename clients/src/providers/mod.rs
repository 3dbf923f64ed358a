//! Provider implementations of the generation capability.

pub mod anthropic;
pub mod google;
pub mod mock;

pub use anthropic::AnthropicClient;
pub use google::GoogleClient;
pub use mock::{MockProvider, MockResponse};

use co_core::types::Turn;

/// Chat role of a history turn, relative to the provider being asked:
/// its own past turns read as the assistant, everything else as the
/// user.
pub(crate) fn relative_role(turn: &Turn, provider_name: &str) -> &'static str {
    if turn.provider == provider_name {
        "assistant"
    } else {
        "user"
    }
}
