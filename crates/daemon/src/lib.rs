pub mod cli;
pub mod interfaces;
pub mod pipeline;

pub use interfaces::{InMemoryTable, InMemoryVectorStore, Parser, PlaintextParser, SearchHit, VectorStore, VectorTable};
pub use pipeline::Pipeline;
