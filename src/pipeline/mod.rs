//! Consumers of the provider layer: page OCR and translation.
//!
//! ## Data Flow
//!
//! ```text
//! page images ──▶ scan ──▶ merge/structure ──▶ translate
//!  (png/jpeg)    (vision)   (pure functions)    (chat)
//! ```
//!
//! 1. [`scan`]      — one `vision` call per page, tagged reply parsed into
//!    [`scan::PageContent`]; book structure and scripture merging are pure
//! 2. [`translate`] — paragraph, batch, footnote and scripture translation
//!    through `chat`
//! 3. [`cleanup`]   — deterministic fixes to raw model text (fences, CRLF,
//!    invisible characters) shared by both stages

pub mod cleanup;
pub mod scan;
pub mod translate;
