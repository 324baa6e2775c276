//! C10 — RPC frame parsing and the method dispatch table (§4.3–4.5).

pub mod frame;
pub mod handlers;
pub mod router;
pub mod types;

pub use frame::{RpcData, RpcMessage};
pub use router::{ConnectionState, RpcRouter};
