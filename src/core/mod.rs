//! Core business logic module
//!
//! Device I/O goes through the [`protocol::Transport`] and
//! [`flash::CommandRunner`] traits; the implementations live in
//! [`crate::infra`].
//!
//! # Submodules
//!
//! - [`protocol`] - 32-byte request/response framing
//! - [`device`] - Typed device requests
//! - [`features`] - Keyboard feature descriptor and rules.mk parsing
//! - [`side`] - Side lock arbitration
//! - [`bootloader`] - Bootloader entry and detection wait
//! - [`flash`] - Flash planning and orchestration
//! - [`doctor`] - Environment checks
//! - [`global_config`] - Global configuration management

pub mod bootloader;
pub mod device;
pub mod doctor;
pub mod features;
pub mod flash;
pub mod global_config;
pub mod protocol;
pub mod side;
