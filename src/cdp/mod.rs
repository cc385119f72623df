//! The narrow slice of the Chrome DevTools Protocol this crate speaks:
//! `Network.enable`, the `Fetch` domain, and the HTTP discovery endpoint
//! (§6). Hand-authored rather than generated from the CDP's `.pdl` files —
//! see DESIGN.md.

pub mod fetch;
pub mod network;
pub mod target;

pub use fetch::*;
pub use network::*;
pub use target::*;
