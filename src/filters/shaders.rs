//! GLSL sources for the built-in filters.
//!
//! Every stage is `#version 450` followed by a shared prelude that declares
//! the mesh attribute, the uniform block and the emote sampler, then the
//! filter body. Variants of one body are selected with `#define`s.

macro_rules! vertex {
    ($body:literal $(, $define:literal)*) => {
        concat!(
            "#version 450\n",
            $($define, "\n",)*
            include_str!("glsl/prelude.vert"),
            include_str!($body),
        )
    };
}

macro_rules! fragment {
    ($body:literal $(, $define:literal)*) => {
        concat!(
            "#version 450\n",
            $($define, "\n",)*
            include_str!("glsl/prelude.frag"),
            include_str!($body),
        )
    };
}

pub const HOP_VERT: &str = vertex!("glsl/hop.vert", "#define X_TIME_INTERVAL 0.85", "#define BOUNCING 1.0");
pub const HOPPER_VERT: &str = vertex!("glsl/hop.vert", "#define X_TIME_INTERVAL (0.85 / 2.0)", "#define BOUNCING 1.0");
pub const OVERHEAT_VERT: &str = vertex!("glsl/hop.vert", "#define X_TIME_INTERVAL (0.85 / 8.0)", "#define BOUNCING 1.0");
pub const SLIDE_VERT: &str = vertex!("glsl/hop.vert", "#define X_TIME_INTERVAL 0.85", "#define BOUNCING 0.0");
pub const BOUNCE_VERT: &str = vertex!("glsl/bounce.vert");
pub const CIRCLE_VERT: &str = vertex!("glsl/circle.vert");
pub const LAUGHING_VERT: &str = vertex!("glsl/laughing.vert");
pub const BLOB_VERT: &str = vertex!("glsl/blob.vert");
pub const FULLSCREEN_VERT: &str = vertex!("glsl/fullscreen.vert");
pub const HARD_VERT: &str = vertex!("glsl/hard.vert");
pub const PEEK_VERT: &str = vertex!("glsl/peek.vert");

pub const EMOTE_FRAG: &str = fragment!("glsl/emote.frag");
pub const OVERHEAT_FRAG: &str = fragment!("glsl/emote.frag", "#define TINT vec4(1.0, 0.0, 0.0, 1.0)");
pub const GO_FRAG: &str = fragment!("glsl/scroll.frag", "#define SPEED 4.0", "#define SCROLL_X");
pub const ELEVATOR_FRAG: &str = fragment!("glsl/scroll.frag", "#define SPEED 4.0", "#define SCROLL_Y");
pub const RAIN_FRAG: &str = fragment!("glsl/scroll.frag", "#define SPEED 1.0");
pub const PRIDE_FRAG: &str = fragment!("glsl/pride.frag");
