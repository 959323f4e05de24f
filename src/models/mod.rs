pub mod document;
pub mod plan;
pub mod workspace;
