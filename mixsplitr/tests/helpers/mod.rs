//! Test Helper Utilities
//!
//! Shared utilities for mixsplitr integration tests

#![allow(dead_code)]

pub mod audio_generator;
pub mod fake_providers;

pub use audio_generator::{generate_mix_wav, MixConfig};
pub use fake_providers::{matched, ScriptedProvider};
