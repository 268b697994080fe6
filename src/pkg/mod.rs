//! Alpine-compatible package manager.
//!
//! - `resolve`: alias table, soname table, dependency token normalization
//! - `repo`: directory listing scan and name-to-URL index
//! - `archive`: APK metadata and extraction
//! - `ledger`: installed-package record
//! - `transport`: network seam (reqwest + aria2c)
//! - `manager`: sequential install/remove/list/update
//! - `pipeline`: concurrent bulk install

pub mod archive;
pub mod ledger;
pub mod manager;
pub mod pipeline;
pub mod repo;
pub mod resolve;
pub mod transport;

pub use ledger::{Ledger, Package};
pub use manager::PackageManager;
pub use pipeline::{BulkInstaller, BulkReport};
pub use transport::{HttpTransport, Transport};
