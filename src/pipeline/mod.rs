//! Pipeline stages for slide text extraction.
//!
//! Each submodule implements exactly one step. Keeping stages separate makes
//! each independently testable and lets us swap an implementation (e.g. a
//! different local recogniser) without touching the others.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ normalize ──▶ extract ──────────────▶ ExtractionResult
//! (path/URL)  (filters)     ├─ local  (tesseract)
//!               │           └─ remote (HTTP, fallback)
//!               └──▶ quality (metrics + advice)
//! ```
//!
//! 1. [`input`]     — read or download an image, sniff its format, decode to
//!    a [`raster::RasterImage`]
//! 2. [`normalize`] — deterministic cleanup built from [`filters`]; runs in
//!    `spawn_blocking` because it is pure CPU work
//! 3. [`quality`]   — scalar metrics and capture advice for the same image
//! 4. [`extract`]   — the two-engine state machine; [`local`] is serialised
//!    behind a mutex, [`remote`] is the only stage with network I/O
//! 5. [`text`]      — the validity gate applied after every engine attempt

pub mod encode;
pub mod extract;
pub mod filters;
pub mod input;
pub mod local;
pub mod normalize;
pub mod quality;
pub mod raster;
pub mod remote;
pub mod text;
