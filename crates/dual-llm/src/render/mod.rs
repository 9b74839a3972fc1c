//! Lightweight markdown styling for generated text.
pub mod markdown;
pub use markdown::{render_markdown, to_plain_text, SpanStyle, StyledSpan};
