pub mod classifier;
pub mod country;
pub mod models;
pub mod pipeline;
pub mod relevance;
pub mod sanitize;
