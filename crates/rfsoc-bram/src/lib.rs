//! RFSoC BRAM Server
//!
//! This crate exposes named BRAM regions of an RFSoC design over TCP. The
//! regions are mapped from physical memory and served read-only:
//!
//! - **Server**: maps every region in the address table through `/dev/mem`
//!   and answers `<region> <offset> <length>` requests with raw bytes
//! - **Client**: sends a request and reassembles a response of known length
//! - **Simulation**: in-memory regions for development without hardware
//!
//! # Feature Flags
//!
//! - `devmem` (default): physical memory mapping (requires Linux)
//!
//! # Example
//!
//! ```rust,no_run
//! use rfsoc_bram::{BramContext, BramServer, RegionTable};
//! use rfsoc_bram::config::ServerConfig;
//! use std::sync::Arc;
//!
//! // Serve zero-filled regions for the RFSoC 4x2 spectrometer table
//! let ctx = BramContext::simulated(RegionTable::rfsoc4x2_spectrometer());
//! let server = BramServer::bind(&ServerConfig::default(), Arc::new(ctx)).unwrap();
//! server.serve().unwrap();
//! ```

pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod serializer;
pub mod server;
pub mod sim;
pub mod table;
pub mod traits;

#[cfg(feature = "devmem")]
pub mod mmap;

// Re-export main types
pub use client::{is_error_marker, BramClient, ClientConfig};
pub use config::BramConfig;
pub use context::BramContext;
pub use error::{BramError, BramResult, ClientError};
pub use protocol::{Request, RequestHandler, ERROR_MARKER};
pub use serializer::ReadSerializer;
pub use server::{AcceptPolicy, BramServer, StopHandle, DEFAULT_PORT};
pub use sim::SimulatedRegion;
pub use table::{RegionDescriptor, RegionEntry, RegionTable, SizeClass, SizeRules, TablePreset};
pub use traits::BramWindow;

#[cfg(feature = "devmem")]
pub use mmap::{MappedRegion, RegionMapper};
