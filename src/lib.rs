//! wlcbee: wireless LAN controller poller.
//!
//! Polls wireless LAN controllers over SNMPv2c, tracks which access points
//! each controller reports, and publishes presence and traffic events to an
//! MQTT broker keyed by access point.
//!
//! ## Modules
//!
//! * `config`: TOML configuration with `validator` checks. Logger, poller,
//!   publisher, transport and target sections.
//!
//! * `core`: the runtime.
//!   - SNMP subtree walker and BER codec
//!   - per-target polling workers and their device cache
//!   - worker pool actor and the coordinator feeding it targets
//!   - event queue, broker readiness and the publisher
//!
//! * `logger`: `tracing` initialization with console (compact, pretty, JSON)
//!   and optional journald output.
//!
//! ## Features
//!
//! * `wlcbee-mqtt`: MQTT transport through the `wlcbee_mqtt` crate
//!   (default: enabled).

pub mod config;
pub mod core;
pub mod logger;
