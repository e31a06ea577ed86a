#![doc = include_str!("../README.md")]

#[cfg(feature = "llvm")]
pub mod analyses;
pub mod dialects;
#[cfg(feature = "hls")]
pub mod hls;
pub mod passes;
pub mod util;

mod core;
pub use self::core::*;

extern crate color_eyre;
extern crate tracing;
extern crate tracing_subscriber;
