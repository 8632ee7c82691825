//! Concrete plugins shipped with the engine.
//!
//! Web-search, image-search, browser-automation, and style-scraper
//! plugins are Non-goals (SPEC_FULL.md §1): the [`Plugin`](crate::plugin::Plugin)
//! trait and [`PluginRegistry`](crate::plugin::PluginRegistry) support them,
//! but no concrete body ships here.

pub mod dedupe;
pub mod schema_validate;
