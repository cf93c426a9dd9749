// Include handlers module directly from handlers.rs
#[path = "handlers.rs"]
pub mod handlers;

// Re-export commonly used handler functions for convenience
pub use handlers::{
    GlobalOptions, choose_categories, open_store, parse_categories, resolve_cache_path,
    verbosity_level,
};

// Re-export the pipeline types the handlers drive
pub use flowlens_core::pipeline::{FlowPipeline, PipelineOptions, Selection};
