pub mod config;
pub mod db;
pub mod error;
pub mod fallback;
pub mod http;
pub mod llm;
pub mod pipeline;
pub mod prompts;
pub mod stages;
pub mod wechat;

pub use error::{Error, Result};
