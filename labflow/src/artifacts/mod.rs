//! Artifact retrieval.
//!
//! Completed runs publish zip artifacts. [`ArtifactRetriever`] finds the
//! artifacts of a run and either decodes the first JSON payload or unpacks
//! the bundle and promotes the newest `iteration_<n>` directory to a stable
//! location. The pure zip and filesystem helpers live in [`archive`].

pub mod archive;
mod retriever;

pub use retriever::ArtifactRetriever;
