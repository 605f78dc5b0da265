//! # Wasfa Support
//!
//! Shared utilities for the Wasfa resolution runtime.
//!
//! This crate provides:
//! - Text rendering for resolution traces and cycle chains
//! - Type-name shortening and "did you mean?" suggestions

pub mod rendering;
