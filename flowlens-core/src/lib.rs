pub mod aggregate;
pub mod cache;
pub mod chord;
pub mod classify;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod report;
pub mod resolve;
pub mod sankey;
pub mod store;
pub mod truncate;

pub use cache::ResultCache;
pub use chord::ChordMatrix;
pub use error::{FlowError, StoreError};
pub use model::{Direction, FlowGroup, FlowRecord, NodeKind, SankeyLink, SankeyNode};
pub use pipeline::{ChordView, FlowPipeline, FlowSource, PipelineOptions, RenderGuard, SankeyView, Selection};
pub use resolve::{HostLabels, HostnameCache, ReverseDns};
pub use sankey::SankeyGraph;
pub use store::{KvStore, MemoryStore, SqliteStore};
pub use truncate::Truncation;
