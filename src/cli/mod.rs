pub mod command;
pub mod decode;
pub mod info;
mod progress;
pub mod remux;
mod stream;
