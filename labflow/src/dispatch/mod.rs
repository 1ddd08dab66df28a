//! External job dispatch and polling.
//!
//! The dispatch API returns no run handle, so a run is correlated with its
//! trigger by counting runs before the dispatch and pinning the freshest run
//! once the count grows. After pinning, only that run is inspected.

mod diagnostics;
mod dispatcher;
mod state;

pub use diagnostics::JobDiagnostic;
pub use dispatcher::{JobDispatcher, JobTarget};
pub use state::DispatchState;
