//! Client for the ecoinvent dataset distribution service.
//!
//! [`client::EcoinventClient`] logs in, lists releases and streams archives
//! into a [`store::CachedStorage`]; [`release`] layers the filename-keyed
//! cache on top and [`process`] exposes single-dataset access.

pub mod cache;
pub mod client;
pub mod distance;
pub mod domain;
pub mod download;
pub mod error;
pub mod fs_util;
pub mod listing;
pub mod output;
pub mod process;
pub mod release;
pub mod session;
pub mod settings;
pub mod store;
pub mod version_fix;
