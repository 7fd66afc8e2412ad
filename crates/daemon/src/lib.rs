// Re-export modules for library use
pub mod audio_sink;
pub mod config;
pub mod stream_sink;
pub mod text_sink;
