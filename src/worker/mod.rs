//! Worker side of the build-server link.
//!
//! [`server::WorkerServer`] owns the rendezvous markers and the accept
//! loop; [`dispatcher`] serves dependency-resolution requests from build
//! participants; [`engine`] is the seam to the build execution collaborator.

pub mod cache;
pub mod dispatcher;
pub mod engine;
pub mod resolver;
pub mod server;

pub use dispatcher::{dispatcher, DispatchLoop, ResolutionDispatcher};
pub use engine::{BuildEngine, CommandEngine};
pub use resolver::{DirectoryResolver, NodeRegistry, NodeSender, ReferenceResolver, Resolution};
pub use server::WorkerServer;
