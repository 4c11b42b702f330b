pub mod config;
pub mod dbscan;
pub mod distance;
pub mod embedding;
pub mod error;
pub mod export;
pub mod ingest;
pub mod insights;
pub mod log_entry;
pub mod normalizer;
pub mod ollama;
pub mod pipeline;
pub mod silhouette;
pub mod summarize;
pub mod vector_ops;
