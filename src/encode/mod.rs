pub mod animation;
pub mod ffmpeg;
pub mod output;
pub mod session;
