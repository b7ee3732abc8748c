//! The in-process coverage agent embedded in a service under test.
//!
//! The instrumented build registers its counter tables at startup and then
//! calls [`start`], which binds an HTTP endpoint, registers with the
//! coverage hub, and keeps the hub's liveness fresh until the process is
//! told to exit.

mod counters;
mod report;
mod runtime;

pub use counters::CounterSet;
pub use counters::global_counters;
pub use counters::register_file;
pub use report::render_report;
pub use runtime::AgentConfig;
pub use runtime::router;
pub use runtime::router_with_counters;
pub use runtime::run;
pub use runtime::start;
