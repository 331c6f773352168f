//! emotefx: looping shader filters for emotes.
//!
//! A filter is a GLSL program that animates a source image over a fixed
//! loop duration. Filters are previewed live, shown together in a cycling
//! thumbnail gallery and exported frame by frame to an animated GIF.

pub mod capture;
pub mod clock;
pub mod config;
pub mod encoder;
pub mod error;
pub mod export;
pub mod filters;
pub mod frame;
pub mod gallery;
pub mod input;
pub mod output;
pub mod session;
pub mod shader;
pub mod text;
pub mod utils;
