//! Core pipeline for dualvision
//!
//! This crate provides the data types shared by every entry point and the
//! image normalization step that keeps uploads under the upstream
//! multimodal API's pixel limit before they are forwarded to a model.

pub mod normalize;
pub mod types;

pub use normalize::{
    decode_limits, normalize, normalize_with_limits, plan_dimensions, shrink_to_fit, NormalizeError,
};
pub use types::*;
