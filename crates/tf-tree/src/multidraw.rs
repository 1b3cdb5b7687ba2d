//! Single-pass multi-histogram filling.
//!
//! [`MultiDraw`] drives one sequential scan over a [`Dataset`] and fills any
//! number of caller-owned histograms, each from its own value and weight
//! expressions, gated by one shared selection:
//!
//! ```text
//! for each row:
//!     common = selection(row)            skip the row if exactly 0
//!     common *= source weight            refreshed on source switch
//!     for each pair:
//!         x [, y], w = eval(row)         shared slots reuse the previous pair
//!         w *= common
//!         fill(x [, y], w) unless w == 0
//! ```
//!
//! Histograms are only borrowed: rows filled before a mid-scan I/O failure
//! stay in them.

use std::time::Instant;

use tf_core::{DrawSummary, Error, Result};

use crate::corrections::Corrections;
use crate::dataset::{Dataset, Row};
use crate::expr::BoundExpr;
use crate::histogram::{Histogram, Histogram1D, Histogram2D};

/// A histogram being filled, selected once at registration.
#[derive(Debug)]
pub enum Target<'h> {
    /// One value expression.
    OneD(&'h mut Histogram1D),
    /// Two value expressions.
    TwoD(&'h mut Histogram2D),
}

impl Target<'_> {
    /// Number of value expressions this target needs.
    pub fn dimension(&self) -> usize {
        match self {
            Target::OneD(_) => 1,
            Target::TwoD(_) => 2,
        }
    }

    /// Name of the underlying histogram.
    pub fn name(&self) -> &str {
        match self {
            Target::OneD(h) => &h.name,
            Target::TwoD(h) => &h.name,
        }
    }

    #[inline]
    fn fill(&mut self, x: f64, y: f64, weight: f64) {
        match self {
            Target::OneD(h) => h.fill(x, weight),
            Target::TwoD(h) => h.fill(x, y, weight),
        }
    }
}

impl<'h> From<&'h mut Histogram1D> for Target<'h> {
    fn from(h: &'h mut Histogram1D) -> Self {
        Target::OneD(h)
    }
}

impl<'h> From<&'h mut Histogram2D> for Target<'h> {
    fn from(h: &'h mut Histogram2D) -> Self {
        Target::TwoD(h)
    }
}

impl<'h> From<&'h mut Histogram> for Target<'h> {
    fn from(h: &'h mut Histogram) -> Self {
        match h {
            Histogram::OneD(h) => Target::OneD(h),
            Histogram::TwoD(h) => Target::TwoD(h),
        }
    }
}

/// One expression slot of a pair.
#[derive(Debug)]
enum Slot {
    Compiled(BoundExpr),
    /// Same text as the previous pair's slot: its value for this row is reused.
    ReusePrevious,
}

impl Slot {
    #[inline]
    fn eval_into(&mut self, row: &Row<'_>, last: &mut f64) {
        if let Slot::Compiled(e) = self {
            *last = e.eval(row);
        }
    }

    fn is_shared(&self) -> bool {
        matches!(self, Slot::ReusePrevious)
    }
}

#[derive(Debug)]
struct Pair<'h> {
    x: Slot,
    y: Option<Slot>,
    weight: Slot,
    x_text: String,
    y_text: Option<String>,
    weight_text: String,
    target: Target<'h>,
}

/// Fills many histograms in one pass over a dataset.
pub struct MultiDraw<'d, 'h> {
    dataset: &'d Dataset,
    corrections: &'d Corrections,
    selection: BoundExpr,
    pairs: Vec<Pair<'h>>,
}

fn or_unit(text: &str) -> &str {
    let t = text.trim();
    if t.is_empty() { "1" } else { t }
}

impl<'d, 'h> MultiDraw<'d, 'h> {
    /// Bind the shared `selection` (empty means `1`) against `dataset`.
    pub fn new(dataset: &'d Dataset, corrections: &'d Corrections, selection: &str) -> Result<Self> {
        let selection = BoundExpr::parse(or_unit(selection), dataset.schema(), corrections)?;
        Ok(Self { dataset, corrections, selection, pairs: Vec::new() })
    }

    /// Register a 1-D histogram filled with `x`, weighted by `weight`.
    pub fn add(&mut self, x: &str, weight: &str, hist: &'h mut Histogram1D) -> Result<()> {
        self.add_target(x, None, weight, Target::OneD(hist))
    }

    /// Register a 2-D histogram filled with `(x, y)`, weighted by `weight`.
    pub fn add_2d(
        &mut self,
        x: &str,
        y: &str,
        weight: &str,
        hist: &'h mut Histogram2D,
    ) -> Result<()> {
        self.add_target(x, Some(y), weight, Target::TwoD(hist))
    }

    /// Register any target. The number of value expressions must match its
    /// dimension. Expressions identical to the previous pair's are not
    /// compiled again; their value is reused during the scan.
    pub fn add_target(
        &mut self,
        x: &str,
        y: Option<&str>,
        weight: &str,
        target: Target<'h>,
    ) -> Result<()> {
        let given = 1 + usize::from(y.is_some());
        if given != target.dimension() {
            return Err(Error::Configuration(format!(
                "histogram '{}' is {}-D but {} value expression(s) were given",
                target.name(),
                target.dimension(),
                given
            )));
        }
        let prev = self.pairs.last();
        let x_text = or_unit(x).to_string();
        let y_text = y.map(|y| or_unit(y).to_string());
        let weight_text = or_unit(weight).to_string();

        let x_shared = prev.is_some_and(|p| p.x_text == x_text);
        let y_shared = prev.is_some_and(|p| p.y_text.is_some() && p.y_text == y_text);
        let w_shared = prev.is_some_and(|p| p.weight_text == weight_text);

        let x = self.slot(&x_text, x_shared)?;
        let y = y_text.as_deref().map(|t| self.slot(t, y_shared)).transpose()?;
        let weight = self.slot(&weight_text, w_shared)?;
        self.pairs.push(Pair { x, y, weight, x_text, y_text, weight_text, target });
        Ok(())
    }

    fn slot(&self, text: &str, shared: bool) -> Result<Slot> {
        if shared {
            return Ok(Slot::ReusePrevious);
        }
        let e = BoundExpr::parse(text, self.dataset.schema(), self.corrections)?;
        Ok(Slot::Compiled(e))
    }

    /// Number of registered pairs.
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// `true` if no pair is registered.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Whether pair `index` reuses the previous pair's x value.
    pub fn shares_value_with_previous(&self, index: usize) -> bool {
        self.pairs.get(index).is_some_and(|p| p.x.is_shared())
    }

    /// Whether pair `index` reuses the previous pair's y value.
    pub fn shares_y_with_previous(&self, index: usize) -> bool {
        self.pairs.get(index).and_then(|p| p.y.as_ref()).is_some_and(Slot::is_shared)
    }

    /// Whether pair `index` reuses the previous pair's weight.
    pub fn shares_weight_with_previous(&self, index: usize) -> bool {
        self.pairs.get(index).is_some_and(|p| p.weight.is_shared())
    }

    /// Scan every row once and fill all targets.
    ///
    /// An unreadable source aborts the scan with an I/O error; histograms keep
    /// the rows accumulated so far.
    pub fn run(mut self) -> Result<DrawSummary> {
        let start = Instant::now();
        let dataset = self.dataset;
        let total = dataset.entries();
        let mut cursor = dataset.cursor();
        let mut summary = DrawSummary::default();
        let mut source_weight = 1.0;

        for entry in 0..total {
            let switched = match cursor.load(entry) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(
                        entry,
                        selected = summary.selected,
                        fills = summary.fills,
                        error = %e,
                        "scan aborted, keeping partial histograms"
                    );
                    return Err(e);
                }
            };
            if switched {
                source_weight = cursor.source_weight();
                if let Some(source) = cursor.source() {
                    tracing::debug!(
                        source = source.name(),
                        weight = source_weight,
                        entry,
                        "switched source"
                    );
                }
            }
            let row = cursor.row(entry).ok_or_else(|| {
                Error::Configuration(format!("entry {entry} not in the loaded source"))
            })?;
            summary.entries += 1;

            let mut common = self.selection.eval(&row);
            if common == 0.0 {
                continue;
            }
            summary.selected += 1;
            common *= source_weight;

            let (mut x, mut y, mut w) = (0.0, 0.0, 0.0);
            for pair in &mut self.pairs {
                pair.x.eval_into(&row, &mut x);
                if let Some(slot) = &mut pair.y {
                    slot.eval_into(&row, &mut y);
                }
                if let Slot::Compiled(e) = &mut pair.weight {
                    w = e.eval(&row) * common;
                }
                if w != 0.0 {
                    pair.target.fill(x, y, w);
                    summary.fills += 1;
                }
            }
        }

        summary.elapsed = start.elapsed();
        tracing::info!(
            entries = summary.entries,
            selected = summary.selected,
            fills = summary.fills,
            histograms = self.pairs.len(),
            elapsed_s = summary.elapsed.as_secs_f64(),
            "multidraw finished"
        );
        Ok(summary)
    }
}
