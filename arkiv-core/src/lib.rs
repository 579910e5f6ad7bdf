//! # arkiv
//!
//! Accessible, archival HTML→PDF conversion. One pipeline turns untrusted
//! HTML into PDF/A-3a + PDF/UA-1 documents, optionally embeds file
//! attachments with associated-file semantics, and validates the result
//! against both profiles into a structured compliance report.
//!
//! ## Pipeline
//!
//! ```text
//! request ──► PdfRenderer ──► raw PDF ──► AttachmentEmbedder ──► final PDF
//!             │  (FontCatalog, AssetResolver,                      │
//!             │   ImageOptimizer)                                  ▼
//!             │                                          ValidationEngine
//!             │                                                    │
//!             └────────────────────────────────────────► ComplianceReport
//! ```
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use arkiv::{FontCatalog, PdfRenderer, RenderOptions, ValidationEngine};
//!
//! # fn main() -> arkiv::Result<()> {
//! let catalog = Arc::new(FontCatalog::new());
//! catalog.warmup()?;
//!
//! let renderer = PdfRenderer::new(catalog);
//! let pdf = renderer.render(
//!     "<html lang=\"en\"><head><title>Hello</title></head><body><h1>Hello</h1></body></html>",
//!     &RenderOptions {
//!         producer: "my service".to_string(),
//!         base_url: None,
//!         resolver: None,
//!     },
//! )?;
//!
//! let engine = ValidationEngine::new();
//! let report = engine.validate(&pdf)?;
//! assert!(report.is_compliant);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`render`] — HTML normalization, layout, tagged PDF serialization
//! - [`assets`] — SSRF-guarded asset fetching and image optimization
//! - [`fonts`] — embedded font catalog and sRGB color profile
//! - [`attach`] — attachment validation and embedded-file mutation
//! - [`validate`] — dual-profile conformance checking and reporting
//! - [`config`] — environment-driven service configuration

pub mod assets;
pub mod attach;
pub mod config;
pub mod error;
pub mod fonts;
pub mod render;
pub mod validate;

pub use assets::optimizer::ImageOptimizer;
pub use assets::AssetResolver;
pub use attach::{
    validate_requests, AfRelationship, Attachment, AttachmentEmbedder, AttachmentRequest,
};
pub use config::ServiceConfig;
pub use error::{ArkivError, Result};
pub use fonts::{FontCatalog, FontEntry, FontStyle, FontWeight};
pub use render::{PdfRenderer, RenderOptions};
pub use validate::{ComplianceReport, ValidationEngine};
