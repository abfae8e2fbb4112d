//! Animatek - practice session timer daemon
//!
//! One authoritative timer, fanned out to WebSocket observers, recording
//! finished sessions locally and to Google Workspace, and driving Govee
//! lights through a rate-limited queue.

pub mod config;
pub mod devices;
pub mod engine;
pub mod hub;
pub mod ipc;
pub mod reactor;
pub mod recorder;
pub mod state;
pub mod store;
pub mod ws;
