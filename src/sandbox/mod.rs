//! Docker sandbox layer: per-user topologies and playbook execution.
//!
//! This module materializes isolated multi-container environments and runs
//! submitted playbooks inside them using the bollard crate.
//!
//! # Architecture
//!
//! ```text
//!   ┌────────────────────── private bridge network ─────────────────────┐
//!   │                                                                   │
//!   │   ┌────────────┐    ssh     ┌──────────┐      ┌──────────┐        │
//!   │   │ controller │ ─────────▶ │  node 1  │  …   │  node N  │        │
//!   │   │  /ansible  │            └──────────┘      └──────────┘        │
//!   │   └────────────┘                                                  │
//!   └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every resource carries `{app, user_id, type, parent}` labels; the sweeper
//! relies on them to find leftovers after a process restart.

pub mod docker_client;
pub mod executor;
pub mod resources;
pub mod topology;

pub use docker_client::{ContainerSpec, DockerClient, ExecOutcome, ExecResult};
pub use executor::{ExecutionResult, PlaybookExecutor, NOT_EXECUTED_EXIT_CODE, TIMEOUT_EXIT_CODE};
pub use resources::ResourceCaps;
pub use topology::{ProvisionedTopology, TopologyManager, APP_LABEL};
