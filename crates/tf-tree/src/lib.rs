//! # tf-tree
//!
//! Single-pass histogram filling over columnar event datasets, and 2-D ↔ 1-D
//! bin unrolling.
//!
//! ## Example
//!
//! ```
//! use tf_tree::{Column, Corrections, Dataset, Histogram1D, MultiDraw, Schema};
//!
//! let mut ds = Dataset::new(Schema::new().scalar("pt_1").scalar("weight"));
//! ds.add_source(
//!     "DY",
//!     1.5,
//!     vec![
//!         ("pt_1", Column::from(vec![32.0, 48.0, 71.0])),
//!         ("weight", Column::from(vec![1.0, 0.9, 1.1])),
//!     ],
//! )
//! .unwrap();
//!
//! let corrections = Corrections::new();
//! let mut h_pt = Histogram1D::uniform("pt_1", 10, 0.0, 100.0).unwrap();
//! let mut h_lead = Histogram1D::uniform("pt_1_lead", 2, 0.0, 100.0).unwrap();
//! let mut md = MultiDraw::new(&ds, &corrections, "pt_1 > 40").unwrap();
//! md.add("pt_1", "weight", &mut h_pt).unwrap();
//! md.add("pt_1", "", &mut h_lead).unwrap();
//! let summary = md.run().unwrap();
//! assert_eq!(summary.selected, 2);
//! assert_eq!(h_lead.integral(), 3.0);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod corrections;
pub mod dataset;
pub mod draw;
pub mod expr;
pub mod histogram;
pub mod multidraw;
pub mod unroll;
pub mod varexp;

pub use corrections::{Binned1D, Binned2D, Corrections, ExpWeight, RatioTable, TableSpec};
pub use dataset::{Column, Cursor, Dataset, Field, FieldKind, JaggedCol, Row, Schema, Source};
pub use draw::{DrawOutput, DrawPlan, DrawRequest};
pub use expr::{BoundExpr, CompiledExpr};
pub use histogram::{Axis, Histogram, Histogram1D, Histogram2D};
pub use multidraw::{MultiDraw, Target};
pub use unroll::{BinMapper, IndexOptions, transpose};
pub use varexp::{Binning, Varexp};

pub use tf_core::{DrawSummary, Error, Result, ScalarLookup};
