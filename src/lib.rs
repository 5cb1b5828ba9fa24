// This is free and unencumbered software released into the public domain.

//! Camera recorder core: a capture session feeding an H.264 file writer,
//! with on-screen preview frames and a save step into the media library.

extern crate alloc;

pub mod cli;
pub mod shared;

#[cfg(all(feature = "avf", target_os = "ios"))]
pub mod ffi;
