//! Antenna Switch Simulation Library
//!
//! This crate provides the endpoints the switch talks to, in software:
//!
//! - **Ts590Server**: TCP server impersonating a Kenwood TS-590SG for
//!   logging programs, answering from the latest broadcast radio state
//! - **VirtualRelayBoard**: UDP relay controller for tests and for running
//!   the daemon without hardware
//! - **RelayBoard**: the controller's command handling as a plain state machine
//!
//! # Example
//!
//! ```rust
//! use ant_sim::RelayBoard;
//!
//! let mut board = RelayBoard::new();
//! assert_eq!(board.handle("RELAY-SET-255,2,1").as_deref(), Some("RELAY-SET-255,2,1,OK"));
//! assert_eq!(board.handle("RELAY-STATE-255").as_deref(), Some("RELAY-STATE-255,0,2,OK"));
//! ```

pub mod emulator;
pub mod error;
pub mod relay_board;

pub use emulator::{serve_client, Ts590Server, DEFAULT_CAT_PORT};
pub use error::SimError;
pub use relay_board::{RelayBoard, VirtualRelayBoard};
