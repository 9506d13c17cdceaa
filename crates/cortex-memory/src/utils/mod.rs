//! Utilities module - text helpers shared by the consolidation pipeline

pub mod text_utils;

pub use text_utils::TextUtils;
