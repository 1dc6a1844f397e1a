pub mod client;
pub mod cors;
pub mod proxy;
pub mod sse;

pub use client::{AssistantError, ChatClient};
pub use cors::CorsConfig;
pub use proxy::AssistantState;
pub use sse::SseParser;
