pub mod answer;
pub mod embeddings;
pub mod generate;
pub mod provider;
