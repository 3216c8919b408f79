//! Pipeline stages for PDF-to-question extraction.
//!
//! Each submodule implements exactly one step. Only `parse` and `llm` do
//! network I/O, and both sit behind traits, so everything from the model's
//! reply onward is testable with canned input.
//!
//! ## Data Flow
//!
//! ```text
//! parse ──▶ llm ──▶ postprocess ──▶ link ──▶ validate ──▶ write
//! (PDF→MD)  (MD→text) (text→JSON)  (images)  (JSON→typed) (atomic file)
//! ```
//!
//! 1. [`parse`]       — upload the PDF, fetch Markdown and page images
//! 2. [`llm`]         — prompt the model with the Markdown
//! 3. [`postprocess`] — strip fences and decode the reply
//! 4. [`link`]        — attach downloaded images to question/answer slots
//! 5. [`validate`]    — per-question validation with partial recovery
//! 6. [`write`]       — timestamped, atomic JSON output

pub mod link;
pub mod llm;
pub mod parse;
pub mod postprocess;
pub mod validate;
pub mod write;
