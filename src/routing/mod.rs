//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Registration:
//!     (method, pattern, handler)
//!     → pattern.rs (compile to matcher + capture names)
//!     → table.rs (append to the route table)
//!
//! Dispatch:
//!     (method, path)
//!     → table.rs (linear scan in registration order)
//!     → Return: matched Route with bound params, or no match
//! ```
//!
//! # Design Decisions
//! - First registered match wins. Pattern specificity plays no part, so a
//!   broad pattern registered early shadows narrower ones registered later.
//! - No regex: captures are matched by a small backtracking matcher.
//! - Registration may happen while requests are served; the table sits
//!   behind a reader-writer lock.

pub mod pattern;
pub mod table;

pub use pattern::{CompiledPattern, PathMatcher, compile};
pub use table::{Route, RouteMatch, RouteTable};
