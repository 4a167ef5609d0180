//! Global configuration constants: limits, defaults, and on-disk file names.
//!
//! These are compile-time constants; runtime configuration is handled via
//! CLI arguments in the server binary.

/// Maximum number of layers in the HNSW graph.
pub const HNSW_MAX_LAYERS: usize = 16;

/// Default query-time candidate list size (`ef`) before any `SetEf` call.
///
/// Higher values improve recall at the cost of latency.
pub const HNSW_DEFAULT_EF_SEARCH: usize = 10;

/// Maximum allowed vector dimension.
pub const MAX_DIMENSION: u32 = 4096;

/// Maximum number of results (`k`) per search request.
pub const MAX_K: u32 = 10_000;

/// Maximum length of an index name in bytes.
pub const MAX_INDEX_NAME_LEN: usize = 255;

/// Epsilon added to the Euclidean norm when unit-normalizing vectors for
/// cosine spaces, so the zero vector normalizes to zero instead of NaN.
pub const COSINE_NORM_EPSILON: f32 = 1e-15;

/// File holding the serialized index state (config + auto-id counter).
pub const STATE_FILE: &str = "state";

/// File holding the serialized HNSW graph snapshot.
pub const GRAPH_FILE: &str = "index";

/// File holding the write-ahead log; present iff the index is dirty.
pub const WAL_FILE: &str = "log";

/// Default server binding address and port.
pub const DEFAULT_ADDRESS: &str = "0.0.0.0:19530";

/// Default directory for index data.
pub const DEFAULT_DATA_DIR: &str = "./vicinity-data";
