// Cross-cutting concerns shared by both channel workers.
pub mod config;
pub mod error;
pub mod metrics;
pub mod resilience;
pub mod shutdown;
pub mod telemetry;

// Delivery domain: job/record types, the state machine, preference snapshots.
pub mod domain;

// Out-of-scope collaborators: user service, template service, gateway.
pub mod clients;

// Per-channel delivery machinery.
pub mod orchestrator;
pub mod pipeline;
pub mod providers;
pub mod queue;
pub mod repository;

// Inbound reconciliation path and the always-on HTTP surface it rides on.
pub mod server;
pub mod webhook;
