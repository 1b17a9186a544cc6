//! Chroma 6310-series DC electronic load backend for benchlib.
//!
//! A 6310 mainframe holds several plug-in load modules. Each module slot is
//! driven by its own [`Chroma6310`], and slots on the same mainframe share
//! one [`SharedLink`](benchlib_scpi::SharedLink).
//!
//! The module ratings in [`models`] drive automatic range selection: a
//! static program picks `CCL` or `CCH` from its first level, a dynamic
//! program picks `CCDL` or `CCDH` from its largest level.

pub mod builder;
pub mod load;
pub mod models;

pub use builder::ChromaBuilder;
pub use load::{Chroma6310, MAINFRAME_MODEL};
pub use models::{LoadSpec, RangeSpec, select_load_mode, spec_for, supported_sub_models};
