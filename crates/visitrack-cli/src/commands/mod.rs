pub mod client;
pub mod config;
pub mod log;
pub mod meeting;
pub mod track;

pub type CmdResult = Result<(), Box<dyn std::error::Error>>;

/// Runtime for commands that drive the async engine.
pub fn runtime() -> std::io::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
}
