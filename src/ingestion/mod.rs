pub mod extractor;
pub mod pipeline;
pub mod sanitizer;
