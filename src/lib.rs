//! Bamboo container entrypoint.
//!
//! Turns the container environment into the server's configuration files,
//! drops root, strips credentials from the environment and replaces itself
//! with the server process so signals reach it directly.
//!
//! See `DESIGN.md` for the module map.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod env;
pub mod logging;

pub mod manifest;
pub mod materialize;
pub mod perms;
pub mod template;

pub mod jvm;
pub mod privilege;
pub mod redact;
pub mod supervisor;

pub mod bamboo;
pub mod pipeline;
