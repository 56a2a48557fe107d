//! # wotdir
//!
//! HTTP server and CLI around [`wotdir_core::Directory`].

pub mod api;
pub mod cli;
pub mod config;
