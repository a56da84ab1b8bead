// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! OS process lifecycle for tool servers.
//!
//! The [`ProcessSupervisor`] spawns configured servers with piped stdio,
//! checks their liveness on an interval, restarts them after crashes up to
//! a configured ceiling, and stops them gracefully (termination signal,
//! then kill). Every transition is published as a [`ProcessEvent`].

mod error;
mod supervisor;
mod types;

pub use error::SupervisorError;
pub use supervisor::ProcessSupervisor;
pub use types::{ExitState, HealthStatus, ProcessEvent, ProcessPipes, ProcessRecord, ProcessStatus};
