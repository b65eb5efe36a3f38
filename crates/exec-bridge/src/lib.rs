//! Connection bridging between an interactive client and a container
//! runtime exec session.
//!
//! The flow is always the same: create an exec instance for a resource,
//! upgrade a raw TCP connection to the runtime's attach endpoint, then relay
//! bytes in both directions until both sides are done. Callers own the
//! inbound transport and the authorization decision; this crate only needs
//! a readable half and a writable half for the client side.

pub mod bridge;
pub mod error;
pub mod handshake;
pub mod opener;
pub mod runtime;
pub mod session;
pub mod stream;
pub mod target;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use bridge::{bridge, BridgeReport, BridgeStatus, Direction};
pub use error::{BridgeError, BridgeResult};
pub use handshake::AttachClient;
pub use opener::SessionOpener;
pub use runtime::{DockerRuntime, ExecRuntime, RuntimeConfig};
pub use session::{run_exec_session, SessionFailure};
pub use stream::RemoteStream;
pub use target::{CommandSpec, RemoteTarget, SessionHandle, StartExecRequest};
