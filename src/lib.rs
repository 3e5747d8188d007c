//! Fetches tracks that are missing from a personal media library.
//!
//! A [`DownloadCoordinator`](coordinator::DownloadCoordinator) asks a
//! [`Provider`](provider::Provider) where a track can be streamed from,
//! downloads it once no matter how many callers ask for it, decrypts it when
//! needed and files it under `{Artist}/{Album}/`. Catalog lookups, the local
//! library and the media server are collaborators behind the traits of
//! [`library`].
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

#[macro_use]
extern crate log;

pub mod arl;
pub mod cascade;
pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod decrypt;
pub mod error;
pub mod failover;
pub mod http;
pub mod library;
pub mod paths;
pub mod protocol;
pub mod provider;
pub mod quality;
pub mod retry;
pub mod scan;
pub mod throttle;
pub mod track;
pub mod util;

#[cfg(test)]
mod testing;
