//! Fixed-binning weighted histograms.
//!
//! Every histogram keeps explicit underflow/overflow slots: slot `0` is the
//! underflow, slots `1..=n` are the in-range bins and slot `n + 1` is the
//! overflow. Each slot tracks the sum of weights and the sum of squared
//! weights (the variance proxy used for the bin error).

use serde::{Deserialize, Serialize};
use tf_core::{Error, Result};

/// A binned axis defined by its edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct Axis {
    edges: Vec<f64>,
}

impl Axis {
    /// Build an axis from sorted bin edges (length = n_bins + 1).
    pub fn new(edges: Vec<f64>) -> Result<Self> {
        if edges.len() < 2 {
            return Err(Error::Configuration(format!(
                "axis needs at least one bin, got {} edge(s)",
                edges.len()
            )));
        }
        if edges.iter().any(|e| !e.is_finite()) {
            return Err(Error::Configuration("axis edges must be finite".into()));
        }
        if edges.windows(2).any(|w| w[1] < w[0]) {
            return Err(Error::Configuration(format!("axis edges are not sorted: {:?}", edges)));
        }
        if edges[edges.len() - 1] <= edges[0] {
            return Err(Error::Configuration(format!(
                "axis range is empty: [{}, {}]",
                edges[0],
                edges[edges.len() - 1]
            )));
        }
        Ok(Self { edges })
    }

    /// Build an axis of `n_bins` equal-width bins over `[low, high]`.
    pub fn uniform(n_bins: usize, low: f64, high: f64) -> Result<Self> {
        if n_bins == 0 {
            return Err(Error::Configuration("axis has zero bins".into()));
        }
        let width = (high - low) / n_bins as f64;
        let mut edges: Vec<f64> = (0..n_bins).map(|i| low + width * i as f64).collect();
        edges.push(high);
        Self::new(edges)
    }

    /// `n_bins` unit-width bins over `[1, n_bins + 1]`, the binning of an
    /// unrolled histogram. `n_bins` must be non-zero.
    pub(crate) fn unit(n_bins: usize) -> Self {
        debug_assert!(n_bins > 0);
        Self { edges: (1..=n_bins + 1).map(|i| i as f64).collect() }
    }

    /// Number of in-range bins.
    #[inline]
    pub fn n_bins(&self) -> usize {
        self.edges.len() - 1
    }

    /// Bin edges (length = n_bins + 1).
    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    /// Lower edge of the first bin.
    pub fn low(&self) -> f64 {
        self.edges[0]
    }

    /// Upper edge of the last bin.
    pub fn high(&self) -> f64 {
        self.edges[self.edges.len() - 1]
    }

    /// Find the slot for `value`.
    ///
    /// Returns `0` below the axis, `n_bins + 1` above it (and for NaN).
    /// Bins are `[low, high)`, except the last bin which also contains the
    /// upper edge of the axis.
    pub fn find_bin(&self, value: f64) -> usize {
        let n = self.n_bins();
        if value < self.low() {
            return 0;
        }
        if value.is_nan() || value > self.high() {
            return n + 1;
        }
        // Number of edges <= value; an inner edge belongs to the upper bin.
        let i = self.edges.partition_point(|&e| e <= value);
        i.min(n)
    }

    /// Width of in-range bin `bin` (1-based). Zero for flow slots.
    pub fn width(&self, bin: usize) -> f64 {
        if bin == 0 || bin > self.n_bins() {
            return 0.0;
        }
        self.edges[bin] - self.edges[bin - 1]
    }

    /// Centre of in-range bin `bin` (1-based).
    ///
    /// Flow slots are given the centre of a virtual bin of the same width
    /// as their neighbour.
    pub fn center(&self, bin: usize) -> f64 {
        let n = self.n_bins();
        if bin == 0 {
            self.low() - 0.5 * self.width(1)
        } else if bin > n {
            self.high() + 0.5 * self.width(n)
        } else {
            0.5 * (self.edges[bin - 1] + self.edges[bin])
        }
    }
}

impl TryFrom<Vec<f64>> for Axis {
    type Error = Error;

    fn try_from(edges: Vec<f64>) -> Result<Self> {
        Axis::new(edges)
    }
}

impl From<Axis> for Vec<f64> {
    fn from(axis: Axis) -> Self {
        axis.edges
    }
}

/// A 1D histogram with under/overflow slots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Histogram1DRepr")]
pub struct Histogram1D {
    /// Histogram name.
    pub name: String,
    /// Histogram title.
    #[serde(default)]
    pub title: String,
    axis: Axis,
    contents: Vec<f64>,
    sumw2: Vec<f64>,
    entries: u64,
}

impl Histogram1D {
    /// Create an empty histogram over `axis`.
    pub fn new(name: impl Into<String>, axis: Axis) -> Self {
        let slots = axis.n_bins() + 2;
        Self {
            name: name.into(),
            title: String::new(),
            axis,
            contents: vec![0.0; slots],
            sumw2: vec![0.0; slots],
            entries: 0,
        }
    }

    /// Create an empty histogram with `n_bins` equal-width bins.
    pub fn uniform(name: impl Into<String>, n_bins: usize, low: f64, high: f64) -> Result<Self> {
        Ok(Self::new(name, Axis::uniform(n_bins, low, high)?))
    }

    /// Set the title (builder style).
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// The binning.
    pub fn axis(&self) -> &Axis {
        &self.axis
    }

    /// Number of in-range bins.
    pub fn n_bins(&self) -> usize {
        self.axis.n_bins()
    }

    /// Number of fills.
    pub fn entries(&self) -> u64 {
        self.entries
    }

    /// Add `weight` at coordinate `x`.
    #[inline]
    pub fn fill(&mut self, x: f64, weight: f64) {
        let bin = self.axis.find_bin(x);
        self.contents[bin] += weight;
        self.sumw2[bin] += weight * weight;
        self.entries += 1;
    }

    /// Sum of weights in `slot` (0 = underflow, n+1 = overflow).
    pub fn content(&self, slot: usize) -> f64 {
        self.contents[slot]
    }

    /// Sum of squared weights in `slot`.
    pub fn sumw2(&self, slot: usize) -> f64 {
        self.sumw2[slot]
    }

    /// Statistical error of `slot`: `sqrt(sumw2)`.
    pub fn error(&self, slot: usize) -> f64 {
        self.sumw2[slot].sqrt()
    }

    /// Overwrite the content of `slot`.
    pub fn set_content(&mut self, slot: usize, value: f64) {
        self.contents[slot] = value;
    }

    /// Overwrite the error of `slot` (stored as its square).
    pub fn set_error(&mut self, slot: usize, error: f64) {
        self.sumw2[slot] = error * error;
    }

    /// Overwrite the sum of squared weights of `slot`.
    pub fn set_sumw2(&mut self, slot: usize, sumw2: f64) {
        self.sumw2[slot] = sumw2;
    }

    /// Contents of all slots, including under/overflow.
    pub fn contents(&self) -> &[f64] {
        &self.contents
    }

    /// Sum of in-range contents.
    pub fn integral(&self) -> f64 {
        self.contents[1..=self.n_bins()].iter().sum()
    }

    /// Add another histogram with identical binning, slot by slot.
    pub fn add(&mut self, other: &Histogram1D) -> Result<()> {
        if self.axis != other.axis {
            return Err(Error::ShapeMismatch(format!(
                "cannot add '{}' ({} bins) to '{}' ({} bins): binning differs",
                other.name,
                other.n_bins(),
                self.name,
                self.n_bins()
            )));
        }
        for (a, b) in self.contents.iter_mut().zip(&other.contents) {
            *a += b;
        }
        for (a, b) in self.sumw2.iter_mut().zip(&other.sumw2) {
            *a += b;
        }
        self.entries += other.entries;
        Ok(())
    }

    /// Clear contents, errors and entries, keeping name and binning.
    pub fn reset(&mut self) {
        self.contents.iter_mut().for_each(|c| *c = 0.0);
        self.sumw2.iter_mut().for_each(|c| *c = 0.0);
        self.entries = 0;
    }

    pub(crate) fn set_entries(&mut self, entries: u64) {
        self.entries = entries;
    }
}

/// A 2D histogram with under/overflow slots on both axes.
///
/// Slots are addressed by `(ix, iy)` with `0..=nx+1` and `0..=ny+1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Histogram2DRepr")]
pub struct Histogram2D {
    /// Histogram name.
    pub name: String,
    /// Histogram title.
    #[serde(default)]
    pub title: String,
    x_axis: Axis,
    y_axis: Axis,
    contents: Vec<f64>,
    sumw2: Vec<f64>,
    entries: u64,
}

impl Histogram2D {
    /// Create an empty histogram over the given axes.
    pub fn new(name: impl Into<String>, x_axis: Axis, y_axis: Axis) -> Self {
        let slots = (x_axis.n_bins() + 2) * (y_axis.n_bins() + 2);
        Self {
            name: name.into(),
            title: String::new(),
            x_axis,
            y_axis,
            contents: vec![0.0; slots],
            sumw2: vec![0.0; slots],
            entries: 0,
        }
    }

    /// Create an empty histogram with equal-width bins on both axes.
    #[allow(clippy::too_many_arguments)]
    pub fn uniform(
        name: impl Into<String>,
        nx: usize,
        x_low: f64,
        x_high: f64,
        ny: usize,
        y_low: f64,
        y_high: f64,
    ) -> Result<Self> {
        Ok(Self::new(name, Axis::uniform(nx, x_low, x_high)?, Axis::uniform(ny, y_low, y_high)?))
    }

    /// Set the title (builder style).
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// X binning.
    pub fn x_axis(&self) -> &Axis {
        &self.x_axis
    }

    /// Y binning.
    pub fn y_axis(&self) -> &Axis {
        &self.y_axis
    }

    /// Number of fills.
    pub fn entries(&self) -> u64 {
        self.entries
    }

    #[inline]
    fn slot(&self, ix: usize, iy: usize) -> usize {
        ix + (self.x_axis.n_bins() + 2) * iy
    }

    /// Add `weight` at coordinate `(x, y)`.
    #[inline]
    pub fn fill(&mut self, x: f64, y: f64, weight: f64) {
        let s = self.slot(self.x_axis.find_bin(x), self.y_axis.find_bin(y));
        self.contents[s] += weight;
        self.sumw2[s] += weight * weight;
        self.entries += 1;
    }

    /// Sum of weights in cell `(ix, iy)`.
    pub fn content(&self, ix: usize, iy: usize) -> f64 {
        self.contents[self.slot(ix, iy)]
    }

    /// Sum of squared weights in cell `(ix, iy)`.
    pub fn sumw2(&self, ix: usize, iy: usize) -> f64 {
        self.sumw2[self.slot(ix, iy)]
    }

    /// Statistical error of cell `(ix, iy)`.
    pub fn error(&self, ix: usize, iy: usize) -> f64 {
        self.sumw2(ix, iy).sqrt()
    }

    /// Overwrite the content of cell `(ix, iy)`.
    pub fn set_content(&mut self, ix: usize, iy: usize, value: f64) {
        let s = self.slot(ix, iy);
        self.contents[s] = value;
    }

    /// Overwrite the sum of squared weights of cell `(ix, iy)`.
    pub fn set_sumw2(&mut self, ix: usize, iy: usize, sumw2: f64) {
        let s = self.slot(ix, iy);
        self.sumw2[s] = sumw2;
    }

    /// Sum of in-range contents.
    pub fn integral(&self) -> f64 {
        let (nx, ny) = (self.x_axis.n_bins(), self.y_axis.n_bins());
        let mut sum = 0.0;
        for iy in 1..=ny {
            for ix in 1..=nx {
                sum += self.content(ix, iy);
            }
        }
        sum
    }

    /// Add another histogram with identical binning, cell by cell.
    pub fn add(&mut self, other: &Histogram2D) -> Result<()> {
        if self.x_axis != other.x_axis || self.y_axis != other.y_axis {
            return Err(Error::ShapeMismatch(format!(
                "cannot add '{}' ({}x{}) to '{}' ({}x{}): binning differs",
                other.name,
                other.x_axis.n_bins(),
                other.y_axis.n_bins(),
                self.name,
                self.x_axis.n_bins(),
                self.y_axis.n_bins()
            )));
        }
        for (a, b) in self.contents.iter_mut().zip(&other.contents) {
            *a += b;
        }
        for (a, b) in self.sumw2.iter_mut().zip(&other.sumw2) {
            *a += b;
        }
        self.entries += other.entries;
        Ok(())
    }

    /// Clear contents, errors and entries, keeping name and binning.
    pub fn reset(&mut self) {
        self.contents.iter_mut().for_each(|c| *c = 0.0);
        self.sumw2.iter_mut().for_each(|c| *c = 0.0);
        self.entries = 0;
    }

    pub(crate) fn set_entries(&mut self, entries: u64) {
        self.entries = entries;
    }
}

// Unvalidated wire forms; slot vectors must match the axes.

#[derive(Deserialize)]
struct Histogram1DRepr {
    name: String,
    #[serde(default)]
    title: String,
    axis: Axis,
    contents: Vec<f64>,
    sumw2: Vec<f64>,
    #[serde(default)]
    entries: u64,
}

impl TryFrom<Histogram1DRepr> for Histogram1D {
    type Error = Error;

    fn try_from(r: Histogram1DRepr) -> Result<Self> {
        let slots = r.axis.n_bins() + 2;
        if r.contents.len() != slots || r.sumw2.len() != slots {
            return Err(Error::ShapeMismatch(format!(
                "histogram '{}': expected {} slots, got {} contents and {} sumw2",
                r.name,
                slots,
                r.contents.len(),
                r.sumw2.len()
            )));
        }
        Ok(Histogram1D {
            name: r.name,
            title: r.title,
            axis: r.axis,
            contents: r.contents,
            sumw2: r.sumw2,
            entries: r.entries,
        })
    }
}

#[derive(Deserialize)]
struct Histogram2DRepr {
    name: String,
    #[serde(default)]
    title: String,
    x_axis: Axis,
    y_axis: Axis,
    contents: Vec<f64>,
    sumw2: Vec<f64>,
    #[serde(default)]
    entries: u64,
}

impl TryFrom<Histogram2DRepr> for Histogram2D {
    type Error = Error;

    fn try_from(r: Histogram2DRepr) -> Result<Self> {
        let slots = (r.x_axis.n_bins() + 2) * (r.y_axis.n_bins() + 2);
        if r.contents.len() != slots || r.sumw2.len() != slots {
            return Err(Error::ShapeMismatch(format!(
                "histogram '{}': expected {} slots, got {} contents and {} sumw2",
                r.name,
                slots,
                r.contents.len(),
                r.sumw2.len()
            )));
        }
        Ok(Histogram2D {
            name: r.name,
            title: r.title,
            x_axis: r.x_axis,
            y_axis: r.y_axis,
            contents: r.contents,
            sumw2: r.sumw2,
            entries: r.entries,
        })
    }
}

/// A histogram of either dimensionality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Histogram {
    /// One axis.
    #[serde(rename = "1d")]
    OneD(Histogram1D),
    /// Two axes.
    #[serde(rename = "2d")]
    TwoD(Histogram2D),
}

impl Histogram {
    /// Histogram name.
    pub fn name(&self) -> &str {
        match self {
            Histogram::OneD(h) => &h.name,
            Histogram::TwoD(h) => &h.name,
        }
    }

    /// Rename the histogram.
    pub fn set_name(&mut self, name: impl Into<String>) {
        match self {
            Histogram::OneD(h) => h.name = name.into(),
            Histogram::TwoD(h) => h.name = name.into(),
        }
    }

    /// Number of axes.
    pub fn dimension(&self) -> usize {
        match self {
            Histogram::OneD(_) => 1,
            Histogram::TwoD(_) => 2,
        }
    }

    /// Number of fills.
    pub fn entries(&self) -> u64 {
        match self {
            Histogram::OneD(h) => h.entries(),
            Histogram::TwoD(h) => h.entries(),
        }
    }

    /// Sum of in-range contents.
    pub fn integral(&self) -> f64 {
        match self {
            Histogram::OneD(h) => h.integral(),
            Histogram::TwoD(h) => h.integral(),
        }
    }

    /// Add a histogram of the same kind and binning.
    pub fn add(&mut self, other: &Histogram) -> Result<()> {
        match (self, other) {
            (Histogram::OneD(a), Histogram::OneD(b)) => a.add(b),
            (Histogram::TwoD(a), Histogram::TwoD(b)) => a.add(b),
            (a, b) => Err(Error::ShapeMismatch(format!(
                "cannot add {}D histogram '{}' to {}D histogram '{}'",
                b.dimension(),
                b.name(),
                a.dimension(),
                a.name()
            ))),
        }
    }

    /// Clear contents, errors and entries.
    pub fn reset(&mut self) {
        match self {
            Histogram::OneD(h) => h.reset(),
            Histogram::TwoD(h) => h.reset(),
        }
    }

    /// The 1D histogram, if this is one.
    pub fn as_1d(&self) -> Option<&Histogram1D> {
        match self {
            Histogram::OneD(h) => Some(h),
            Histogram::TwoD(_) => None,
        }
    }

    /// The 2D histogram, if this is one.
    pub fn as_2d(&self) -> Option<&Histogram2D> {
        match self {
            Histogram::TwoD(h) => Some(h),
            Histogram::OneD(_) => None,
        }
    }
}

impl From<Histogram1D> for Histogram {
    fn from(h: Histogram1D) -> Self {
        Histogram::OneD(h)
    }
}

impl From<Histogram2D> for Histogram {
    fn from(h: Histogram2D) -> Self {
        Histogram::TwoD(h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_bin_edge_cases() {
        let axis = Axis::new(vec![0.0, 1.0, 2.0, 3.0]).unwrap();
        assert_eq!(axis.find_bin(-0.5), 0);
        assert_eq!(axis.find_bin(0.0), 1);
        assert_eq!(axis.find_bin(1.0), 2);
        assert_eq!(axis.find_bin(2.99), 3);
        // Upper edge of the last bin is still in range.
        assert_eq!(axis.find_bin(3.0), 3);
        assert_eq!(axis.find_bin(3.01), 4);
        assert_eq!(axis.find_bin(f64::NAN), 4);
        assert_eq!(axis.find_bin(f64::NEG_INFINITY), 0);
        assert_eq!(axis.find_bin(f64::INFINITY), 4);
    }

    #[test]
    fn axis_rejects_degenerate_edges() {
        assert!(matches!(Axis::new(vec![1.0]), Err(Error::Configuration(_))));
        assert!(matches!(Axis::new(vec![2.0, 1.0]), Err(Error::Configuration(_))));
        assert!(matches!(Axis::new(vec![1.0, 1.0]), Err(Error::Configuration(_))));
        assert!(matches!(Axis::uniform(0, 0.0, 1.0), Err(Error::Configuration(_))));
        assert!(matches!(Axis::new(vec![0.0, f64::INFINITY]), Err(Error::Configuration(_))));
    }

    #[test]
    fn uniform_axis_widths_and_centers() {
        let axis = Axis::uniform(4, 0.0, 100.0).unwrap();
        assert_eq!(axis.edges(), &[0.0, 25.0, 50.0, 75.0, 100.0]);
        assert_eq!(axis.width(2), 25.0);
        assert_eq!(axis.width(0), 0.0);
        assert_eq!(axis.center(1), 12.5);
        assert_eq!(axis.center(0), -12.5);
        assert_eq!(axis.center(5), 112.5);
    }

    #[test]
    fn fill_1d_tracks_sumw2_and_flows() {
        let mut h = Histogram1D::uniform("h", 3, 0.0, 3.0).unwrap();
        h.fill(0.5, 2.0);
        h.fill(0.5, 1.0);
        h.fill(1.5, 3.0);
        h.fill(-1.0, 1.0);
        h.fill(3.5, 1.0);
        assert_eq!(h.contents(), &[1.0, 3.0, 3.0, 0.0, 1.0]);
        assert_eq!(h.sumw2(1), 5.0);
        assert_eq!(h.sumw2(2), 9.0);
        assert_eq!(h.entries(), 5);
        assert_eq!(h.integral(), 6.0);
        assert!((h.error(1) - 5.0f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn fill_2d_slot_layout() {
        let mut h = Histogram2D::uniform("h", 2, 0.0, 2.0, 3, 0.0, 3.0).unwrap();
        h.fill(1.5, 2.5, 4.0);
        h.fill(-1.0, 0.5, 1.0);
        assert_eq!(h.content(2, 3), 4.0);
        assert_eq!(h.sumw2(2, 3), 16.0);
        assert_eq!(h.content(0, 1), 1.0);
        assert_eq!(h.integral(), 4.0);
        assert_eq!(h.entries(), 2);
    }

    #[test]
    fn add_requires_same_binning() {
        let mut a = Histogram1D::uniform("a", 2, 0.0, 2.0).unwrap();
        let mut b = Histogram1D::uniform("b", 2, 0.0, 2.0).unwrap();
        a.fill(0.5, 1.0);
        b.fill(0.5, 2.0);
        a.add(&b).unwrap();
        assert_eq!(a.content(1), 3.0);
        assert_eq!(a.sumw2(1), 5.0);
        assert_eq!(a.entries(), 2);

        let c = Histogram1D::uniform("c", 3, 0.0, 2.0).unwrap();
        assert!(matches!(a.add(&c), Err(Error::ShapeMismatch(_))));

        let mut one: Histogram = a.into();
        let two: Histogram = Histogram2D::uniform("t", 1, 0.0, 1.0, 1, 0.0, 1.0).unwrap().into();
        assert!(matches!(one.add(&two), Err(Error::ShapeMismatch(_))));
    }

    #[test]
    fn histogram_json_is_tagged() {
        let mut h = Histogram1D::uniform("m_vis", 2, 0.0, 100.0).unwrap();
        h.fill(10.0, 1.5);
        let json = serde_json::to_value(Histogram::OneD(h.clone())).unwrap();
        assert_eq!(json["kind"], "1d");
        assert_eq!(json["axis"], serde_json::json!([0.0, 50.0, 100.0]));
        let back: Histogram = serde_json::from_value(json).unwrap();
        assert_eq!(back, Histogram::OneD(h));
    }

    #[test]
    fn rename_keeps_contents() {
        let mut h: Histogram = Histogram2D::uniform("m_vis_pt", 2, 0.0, 1.0, 2, 0.0, 1.0).unwrap().into();
        if let Histogram::TwoD(inner) = &mut h {
            inner.fill(0.25, 0.75, 2.0);
        }
        h.set_name("m_vis_pt_ss");
        assert_eq!(h.name(), "m_vis_pt_ss");
        assert_eq!(h.as_2d().unwrap().content(1, 2), 2.0);
        assert_eq!(h.entries(), 1);
    }

    #[test]
    fn histogram_json_rejects_wrong_slot_count() {
        let json = serde_json::json!({
            "kind": "1d", "name": "h", "axis": [0.0, 1.0], "contents": [0.0, 0.0],
            "sumw2": [0.0, 0.0, 0.0], "entries": 0
        });
        assert!(serde_json::from_value::<Histogram>(json).is_err());
    }

    #[test]
    fn histogram_json_rejects_bad_axis() {
        let json = serde_json::json!({
            "kind": "1d", "name": "h", "axis": [1.0], "contents": [0.0, 0.0],
            "sumw2": [0.0, 0.0], "entries": 0
        });
        assert!(serde_json::from_value::<Histogram>(json).is_err());
    }
}
