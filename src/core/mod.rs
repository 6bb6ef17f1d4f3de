pub mod cache;
pub mod metrics;
pub mod normalizer;
pub mod streaming;
pub mod upstream;

// Re-export commonly used types for convenience
pub use cache::{AudioCache, CacheKey};
pub use metrics::ProxyMetrics;
pub use normalizer::TextNormalizer;
pub use streaming::{StreamedRequest, StreamingAccumulator};
pub use upstream::{
    AttemptOutcome, FailoverSelector, FirstAudioProbe, Relayed, UpstreamAttempt, UpstreamRequest,
    UpstreamTarget, UpstreamTimeouts,
};
