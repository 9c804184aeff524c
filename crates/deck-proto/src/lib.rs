//! Types shared by the deck daemon and the deck player: the track data model,
//! HTTP wire bodies, configuration and platform paths.

pub mod config;
pub mod platform;
pub mod protocol;
pub mod track;
