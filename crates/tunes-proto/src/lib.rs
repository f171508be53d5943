pub mod config;
pub mod platform;
pub mod protocol;
pub mod track;
pub mod xspf;
