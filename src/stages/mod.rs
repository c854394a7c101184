//! Pipeline stages, in execution order: write, summarize, illustrate, lay out.
//! Publication is a single call on [`crate::wechat::WeChatClient`].

pub mod digest;
pub mod illustration;
pub mod layout;
pub mod writer;

pub use digest::Summarizer;
pub use illustration::{Illustrations, Illustrator, ImageGenerator};
pub use layout::Layouter;
pub use writer::Writer;
