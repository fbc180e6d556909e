//! Built-in backends.

pub mod css;
pub mod json;

use crate::backend::BackendDescriptor;

pub static BUILTIN: &[&BackendDescriptor] = &[&css::DESCRIPTOR, &json::DESCRIPTOR];

pub fn lookup(language: &str) -> Option<&'static BackendDescriptor> {
    BUILTIN.iter().copied().find(|d| d.language == language)
}
