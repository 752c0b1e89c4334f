//! Asset Payload Processor
//!
//! Turns a workflow payload into a prioritized manifest, validates it,
//! tracks load progress and caches decoded assets by url.

mod cache;
mod config;
mod data;
mod fetch;
mod manifest;
mod payload;
mod processor;
mod validation;

pub use cache::{AssetCache, LoadingState};
pub use config::{AssetConfig, AssetConfigPatch, DEFAULT_MAX_CACHE_SIZE_BYTES};
pub use data::{AssetData, DecodedAudio};
pub use fetch::{
    decode_asset, decode_wav, AssetFetcher, FetchError, FileFetcher, HttpFetcher, RoutingFetcher,
};
pub use manifest::{
    build_manifest, AssetCategory, AssetKind, AssetManifest, AssetPriority, AssetReference,
};
pub use payload::{AudioSamples, LibraryMidi, Synchronization, TutorialMidi, WorkflowPayload};
pub use processor::AssetProcessor;
pub use validation::{
    validate_payload, SessionSettings, ValidationReport, DEFAULT_KEY_SIGNATURE,
    DEFAULT_METRONOME_STYLE, DEFAULT_TIME_SIGNATURE,
};

#[cfg(test)]
pub(crate) use fetch::testing;
