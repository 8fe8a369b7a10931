pub mod batch;
pub mod characters;
pub mod content;
pub mod drafts;
pub mod extractor;
pub mod images;
pub mod linker;
pub mod llm;
pub mod wizard;
