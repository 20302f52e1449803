pub mod builder;
pub mod retriever;
pub mod vector;
