//! REST API for the arkiv accessible/archival HTML→PDF service.
//!
//! Thin boundary over the `arkiv` pipeline: routing, request/response
//! shapes, and the error→status mapping. All conversion and validation
//! logic lives in the core crate.

mod api;

pub use api::{
    app, convert, convert_with_report, health_check, validate_upload, AppError, AppState,
    ConversionRequest, ConvertWithReportResponse, ErrorResponse,
};
