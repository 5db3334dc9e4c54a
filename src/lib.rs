//! # Chronicle
//!
//! A structured logger that writes typed records into a fixed-size circular
//! buffer, and an offline decoder that recovers them from a raw copy of that
//! buffer, even one taken mid-write or after many wraparounds.
//!
//! ## Key Features
//!
//! * Records are self-framed; a one-byte progress marker per record lets a
//!   reader tell committed records from partial ones without coordination
//! * Literal text is interned once and logged by address
//! * Timestamps are raw monotonic counters, reconciled to wall-clock time
//!   at decode time from a calibration stored in metadata
//! * The buffer can live in memory or in a memory-mapped file
//!
//! ## Main Components
//!
//! * [`Chronicle`] and [`Logger`]: writer front-end, one lock per buffer
//! * [`ring_buffer`]: record framing, reservation and wraparound
//! * [`Epilog`]: decoder pairing buffer bytes with metadata and string tables
//! * [`string_registry`]: process-wide interned string tables
//! * [`efficient_clock`]: monotonic timestamps and calibration
//! * [`store`]: directory layout for persisted chronicles
//!
//! ## Quick Start
//!
//! ```
//! use chronicle::{log, Chronicle, DiscardMetadata};
//!
//! let chronicle = Chronicle::in_memory(4096, DiscardMetadata).unwrap();
//! let logger = chronicle.logger("startup").unwrap();
//!
//! log!(logger, "Invocation: {} [{} arguments]", "myprog", 3);
//!
//! let epilog = chronicle.epilog().unwrap();
//! let entries: Vec<_> = epilog.entries().collect::<Result<_, _>>().unwrap();
//! assert_eq!(entries[0].message(), "Invocation: myprog [3 arguments]");
//! ```

pub mod chronicle;
pub mod config;
pub mod efficient_clock;
pub mod epilog;
pub mod error;
pub mod log_format_registry;
pub mod log_reader;
pub mod loggable;
pub mod metadata;
pub mod ring_buffer;
pub mod store;
pub mod string_registry;

pub use chronicle::{Chronicle, DiscardMetadata, Logger, MetadataHandler, Record};
pub use config::ChronicleConfig;
pub use epilog::{Epilog, Regions};
pub use error::{DecodeError, Error, Result};
pub use log_format_registry::CallSite;
pub use log_reader::{Entry, Field, LogReader};
pub use loggable::{Literal, Loggable, Tag};
pub use metadata::{Metadata, Timing};
pub use store::DirectoryStore;
pub use string_registry::{get_string, register_string, StringBlock, StringResolver, StringTable};
