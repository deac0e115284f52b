//! # VTX Bridge Library
//!
//! Control stack for UART-attached FPV video transmitters (VTX).
//!
//! This library provides the core functionality for keeping a video
//! transmitter's live frequency, output power and pit mode synchronized with
//! a pilot-configured target, speaking either the SmartAudio or the Tramp
//! vendor protocol over a serial link.

pub mod config;
pub mod device;
pub mod error;
pub mod reconciler;
pub mod serial;
pub mod smartaudio;
pub mod tramp;
