//! Shared coverage-profile model: the textual codec, block algebra
//! (merge/filter), per-package metrics, and HTML source annotation.
//!
//! Both the hub and the in-process agent speak this format; the hub merges
//! and filters what agents emit, the agent renders annotated source from it.

mod boundary;
mod codec;
mod error;
mod html;
mod merge;
mod metrics;

pub use boundary::Boundary;
pub use boundary::boundaries;
pub use codec::Profile;
pub use codec::ProfileBlock;
pub use codec::emit_profiles;
pub use codec::parse_profiles;
pub use error::ProfileError;
pub use html::color_css;
pub use html::html_annotate;
pub use html::rgb;
pub use merge::filter_profiles;
pub use merge::merge_profile_sets;
pub use merge::skip_profiles;
pub use metrics::MetricsData;
pub use metrics::MetricsItem;
pub use metrics::metrics_data;
pub use metrics::percent;

/// Counting discipline in which blocks only record "was executed".
/// Duplicate blocks are OR-combined instead of summed.
pub const MODE_SET: &str = "set";
