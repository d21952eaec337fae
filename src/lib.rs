#![forbid(unsafe_code)]

pub mod body;
pub mod book;
pub mod build;
pub mod catalogue;
pub mod cli;
pub mod epub;
pub mod error;
pub mod fetch;
pub mod logging;
pub mod normalize;
