//! Shared utility modules used across Divan components.

pub mod json_file;
