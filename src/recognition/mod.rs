//! Face recognition pipeline
//!
//! The embedding provider is an external collaborator behind a trait; the
//! matcher and enrollment selection are pure logic over the vectors it
//! returns.

pub mod enrollment;
pub mod matcher;
pub mod provider;
pub mod remote;

pub use enrollment::EnrollmentService;
pub use matcher::{best_match, MatchResult};
pub use provider::{normalize, DetectedFace, EmbeddingProvider, FaceQuality, EMBEDDING_DIM};
pub use remote::RemoteEmbeddingProvider;
