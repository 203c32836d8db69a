//! Write-ahead upload cache and dispatcher.
//!
//! Payloads are staged on disk before any network attempt, so a crash
//! between staging and delivery loses nothing. The [`Uploader`] sends
//! staged entries to one of two endpoints:
//!
//! - session payloads go to the sessions URL
//! - blob payloads go to the blobs URL
//!
//! Each dispatch pass makes `1 + automatic_retry_count` attempts per entry
//! with jittered exponential backoff. An entry that keeps failing is
//! deleted once its attempt count exceeds `max_attempts`.
//!
//! # Example
//!
//! ```no_run
//! use vigil_upload::{
//!     CacheOptions, EndpointOptions, MetadataOptions, PayloadType, UploadOptions, Uploader,
//! };
//!
//! # async fn run() -> vigil_upload::Result<()> {
//! let options = UploadOptions::new(
//!     EndpointOptions::new(
//!         "https://a1b2c.data.example.com/v1/log/sessions",
//!         "https://a1b2c.data.example.com/v1/log/blobs",
//!     )?,
//!     CacheOptions::new("/tmp/vigil-uploads"),
//!     MetadataOptions::new("a1b2c", "app/1.0", "0123abcd"),
//! );
//!
//! let uploader = Uploader::new(options)?;
//! uploader.enqueue(PayloadType::Session, br#"{"format":"json"}"#.to_vec())?;
//! let report = uploader.dispatch().await;
//! println!("{report}");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod cache;
pub mod client;
pub mod dispatcher;
pub mod error;
pub mod options;
pub mod types;

pub use cache::UploadCache;
pub use client::{API_KEY_HEADER, DEVICE_ID_HEADER, UploadClient};
pub use dispatcher::{DeliveryOutcome, Uploader};
pub use error::{Result, UploadError};
pub use options::{
    CacheOptions, EndpointOptions, MetadataOptions, RedundancyOptions, UploadOptions,
};
pub use types::{CacheEntry, DispatchReport, PayloadType, UploadEntryId};
