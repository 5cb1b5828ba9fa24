// This is free and unencumbered software released into the public domain.

mod builder;
pub use builder::*;

mod config;
pub use config::*;

mod display;
pub use display::*;

mod driver;
pub use driver::*;

pub mod drivers {
    #[cfg(feature = "ffmpeg")]
    pub mod ffmpeg;

    #[cfg(all(feature = "avf", any(target_os = "ios", target_os = "macos")))]
    pub mod avf;
}

mod error;
pub use error::*;

mod frame;
pub use frame::*;

mod library;
pub use library::*;

mod open;
pub use open::*;

mod preview;
pub use preview::*;

mod recorder;
pub use recorder::*;
