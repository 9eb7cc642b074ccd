//! Isolated execution host.
//!
//! Runs a second, independent pool + processor pair in another execution
//! context (a dedicated thread or a child process) so a misbehaving host
//! runtime cannot take the primary application down with it.
//!
//! ```text
//! primary                                    isolated context
//! IsolatedHost --- JSON lines (id, req) ---> worker::serve
//!   pending[id] <-- JSON lines (id, res) ---   ChunkProcessor -> SessionPool
//! ```
//!
//! Only serialized messages cross the boundary. Each request carries a UUID
//! which the response echoes; a pending map routes responses back to their
//! callers.

mod host;
pub mod protocol;
mod provision;
pub mod worker;

pub use host::IsolatedHost;
pub use protocol::{IsolateRequest, IsolateResponse};
pub use provision::{Link, ProcessProvisioner, ProcessorFactory, Provisioner, ThreadProvisioner};
