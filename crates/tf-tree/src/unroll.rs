//! Unrolling of 2D histograms into 1D histograms with a linear bin number.
//!
//! For a reference grid of `nx` x `ny` bins the in-range cells are numbered
//! row by row, x fastest:
//!
//! ```text
//!     +----+----+----+----+----+
//!   y | 16 | 17 | 18 | 19 | 20 |
//!     +----+----+----+----+----+
//!     | 11 | 12 | 13 | 14 | 15 |
//!     +----+----+----+----+----+
//!     |  6 |  7 |  8 |  9 | 10 |
//!     +----+----+----+----+----+
//!     |  1 |  2 |  3 |  4 |  5 |
//!     +----+----+----+----+----+--> x
//! ```
//!
//! Index `0` collects everything below the grid on either axis and index
//! `nx*ny + 1` everything above it. The unrolled 1D histogram has `nx*ny`
//! unit-width bins over `[1, nx*ny + 1)`, so its slot numbers coincide with
//! the linear index.

use std::ops::RangeInclusive;

use tf_core::{Error, Result, ScalarLookup};

use crate::histogram::{Axis, Histogram1D, Histogram2D};

/// Options for [`BinMapper::linear_index`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexOptions {
    /// Number the cells y fastest instead of x fastest.
    pub transpose: bool,
    /// Fold values above an axis into that axis' last bin instead of
    /// sending them to the global overflow.
    pub fold_overflow: bool,
}

impl IndexOptions {
    /// Transposed numbering.
    pub fn transposed() -> Self {
        Self { transpose: true, fold_overflow: false }
    }
}

/// Bijection between the cells of a fixed 2D grid and a linear bin number.
#[derive(Debug, Clone, PartialEq)]
pub struct BinMapper {
    x: Axis,
    y: Axis,
}

impl BinMapper {
    /// Capture the reference grid from axis edges.
    pub fn new(x_edges: &[f64], y_edges: &[f64]) -> Result<Self> {
        let x = Axis::new(x_edges.to_vec())
            .map_err(|e| Error::Configuration(format!("unroll x axis: {e}")))?;
        let y = Axis::new(y_edges.to_vec())
            .map_err(|e| Error::Configuration(format!("unroll y axis: {e}")))?;
        Ok(Self { x, y })
    }

    /// Capture the reference grid from the axes of a 2D histogram.
    ///
    /// Only the binning is copied; the contents are irrelevant.
    pub fn from_histogram(hist: &Histogram2D) -> Self {
        Self { x: hist.x_axis().clone(), y: hist.y_axis().clone() }
    }

    /// Bins along x.
    pub fn nx(&self) -> usize {
        self.x.n_bins()
    }

    /// Bins along y.
    pub fn ny(&self) -> usize {
        self.y.n_bins()
    }

    /// Number of in-range cells, `nx * ny`.
    pub fn n_cells(&self) -> usize {
        self.nx() * self.ny()
    }

    /// Reference x axis.
    pub fn x_axis(&self) -> &Axis {
        &self.x
    }

    /// Reference y axis.
    pub fn y_axis(&self) -> &Axis {
        &self.y
    }

    /// Linear index of coordinate `(x, y)`.
    ///
    /// Returns `0` if either coordinate is below its axis, `nx*ny + 1` if
    /// either is above (unless folded, see [`IndexOptions::fold_overflow`]),
    /// and a value in `[1, nx*ny]` otherwise.
    pub fn linear_index(&self, x: f64, y: f64, opts: IndexOptions) -> usize {
        let mut xbin = self.x.find_bin(x);
        let mut ybin = self.y.find_bin(y);
        if opts.fold_overflow {
            // NaN stays out of range.
            if x > self.x.high() {
                xbin = self.nx();
            }
            if y > self.y.high() {
                ybin = self.ny();
            }
        }
        self.linear_index_of_bins(xbin, ybin, opts.transpose)
    }

    /// Linear index of cell `(xbin, ybin)`, with `0` and `n + 1` as flow bins.
    pub fn linear_index_of_bins(&self, xbin: usize, ybin: usize, transpose: bool) -> usize {
        let (nx, ny) = (self.nx(), self.ny());
        if xbin == 0 || ybin == 0 {
            0
        } else if xbin > nx || ybin > ny {
            nx * ny + 1
        } else if transpose {
            ny * (xbin - 1) + ybin
        } else {
            nx * (ybin - 1) + xbin
        }
    }

    /// Cell `(xbin, ybin)` of an in-range linear index (natural layout).
    pub fn bins_of_index(&self, index: usize) -> Option<(usize, usize)> {
        if index == 0 || index > self.n_cells() {
            return None;
        }
        let k = index - 1;
        Some((k % self.nx() + 1, k / self.nx() + 1))
    }

    /// Coordinate to fill into an unrolled histogram for `(x, y)`.
    ///
    /// This is the centre of the target bin of a histogram built by
    /// [`unrolled_histogram`](Self::unrolled_histogram): `-0.5` for the
    /// underflow, `nx*ny + 1.5` for the overflow.
    pub fn unrolled_coordinate(&self, x: f64, y: f64, opts: IndexOptions) -> f64 {
        let index = self.linear_index(x, y, opts);
        if index == 0 { -0.5 } else { index as f64 + 0.5 }
    }

    /// Empty 1D histogram with one unit-width bin per cell over `[1, nx*ny + 1)`.
    pub fn unrolled_histogram(&self, name: impl Into<String>) -> Histogram1D {
        Histogram1D::new(name, Axis::unit(self.n_cells()))
    }

    fn check_grid(&self, hist: &Histogram2D) -> Result<()> {
        let (hx, hy) = (hist.x_axis().n_bins(), hist.y_axis().n_bins());
        if hx != self.nx() || hy != self.ny() {
            return Err(Error::ShapeMismatch(format!(
                "'{}' has {}x{} bins, unroll grid is {}x{}",
                hist.name,
                hx,
                hy,
                self.nx(),
                self.ny()
            )));
        }
        Ok(())
    }

    fn check_unrolled(&self, hist: &Histogram1D) -> Result<()> {
        if hist.n_bins() != self.n_cells() {
            return Err(Error::ShapeMismatch(format!(
                "'{}' has {} bins, expected {} x {} = {}",
                hist.name,
                hist.n_bins(),
                self.nx(),
                self.ny(),
                self.n_cells()
            )));
        }
        Ok(())
    }

    /// Unroll a 2D histogram into a new 1D histogram named `<name>_unrolled`.
    ///
    /// Every cell is added to the slot of its linear index. All flow cells
    /// end up in the two reserved slots, contents adding linearly and errors
    /// in quadrature. With `include_flow == false` the flow cells are dropped.
    pub fn flatten(&self, hist: &Histogram2D, include_flow: bool) -> Result<Histogram1D> {
        self.check_grid(hist)?;
        let (nx, ny) = (self.nx(), self.ny());
        let mut out = self.unrolled_histogram(format!("{}_unrolled", hist.name));
        out.title = hist.title.clone();
        for iy in 0..=ny + 1 {
            for ix in 0..=nx + 1 {
                let index = self.linear_index_of_bins(ix, iy, false);
                if !include_flow && (index == 0 || index > nx * ny) {
                    continue;
                }
                out.set_content(index, out.content(index) + hist.content(ix, iy));
                out.set_sumw2(index, out.sumw2(index) + hist.sumw2(ix, iy));
            }
        }
        out.set_entries(hist.entries());
        Ok(out)
    }

    /// Roll an unrolled 1D histogram back up onto the reference grid.
    ///
    /// In-range bins round-trip exactly. The reserved flow slots go to cells
    /// `(0, 0)` and `(nx+1, ny+1)`: merged flow cells cannot be separated again.
    pub fn unflatten(&self, hist: &Histogram1D) -> Result<Histogram2D> {
        self.check_unrolled(hist)?;
        let (nx, ny) = (self.nx(), self.ny());
        let name = hist.name.strip_suffix("_unrolled").unwrap_or(&hist.name);
        let mut out = Histogram2D::new(format!("{name}_rolledup"), self.x.clone(), self.y.clone());
        out.title = hist.title.clone();
        for iy in 1..=ny {
            for ix in 1..=nx {
                let index = self.linear_index_of_bins(ix, iy, false);
                out.set_content(ix, iy, hist.content(index));
                out.set_sumw2(ix, iy, hist.sumw2(index));
            }
        }
        out.set_content(0, 0, hist.content(0));
        out.set_sumw2(0, 0, hist.sumw2(0));
        out.set_content(nx + 1, ny + 1, hist.content(nx * ny + 1));
        out.set_sumw2(nx + 1, ny + 1, hist.sumw2(nx * ny + 1));
        out.set_entries(hist.entries());
        Ok(out)
    }

    /// Divide each in-range bin of an unrolled histogram by the width of
    /// its cell along the fastest-varying axis.
    ///
    /// In the natural layout that is the x bin width; with
    /// `along_transposed` the histogram is taken to be in transposed layout
    /// and the y bin width is used. Bins of zero width are left untouched.
    pub fn divide_by_bin_width(&self, hist: &mut Histogram1D, along_transposed: bool) -> Result<()> {
        self.check_unrolled(hist)?;
        let (fast, slow) = if along_transposed { (&self.y, &self.x) } else { (&self.x, &self.y) };
        let n_fast = fast.n_bins();
        for k in 1..=n_fast * slow.n_bins() {
            let width = fast.width((k - 1) % n_fast + 1);
            if width <= 0.0 {
                continue;
            }
            hist.set_content(k, hist.content(k) / width);
            hist.set_sumw2(k, hist.sumw2(k) / (width * width));
        }
        Ok(())
    }
}

/// Reorder an unrolled histogram from x-fastest to y-fastest numbering.
///
/// Bin `k = nx*(ybin-1) + xbin` moves to `ny*(xbin-1) + ybin`. The flow
/// slots are copied unchanged. `transpose(&transpose(h, nx, ny)?, ny, nx)`
/// reproduces `h`.
pub fn transpose(hist: &Histogram1D, nx: usize, ny: usize) -> Result<Histogram1D> {
    let n = nx * ny;
    if hist.n_bins() != n || n == 0 {
        return Err(Error::ShapeMismatch(format!(
            "'{}' has {} bins, cannot transpose as {} x {}",
            hist.name,
            hist.n_bins(),
            nx,
            ny
        )));
    }
    let mut out = hist.clone();
    for k in 1..=n {
        let xbin = (k - 1) % nx + 1;
        let ybin = (k - 1) / nx + 1;
        let t = ny * (xbin - 1) + ybin;
        out.set_content(t, hist.content(k));
        out.set_sumw2(t, hist.sumw2(k));
    }
    Ok(out)
}

/// `unroll(x, y[, transpose[, fold]])` in expressions.
impl ScalarLookup for BinMapper {
    fn arity(&self) -> RangeInclusive<usize> {
        2..=4
    }

    fn lookup(&self, args: &[f64]) -> f64 {
        let flag = |i: usize| args.get(i).is_some_and(|&v| v > 0.0);
        let opts = IndexOptions { transpose: flag(2), fold_overflow: flag(3) };
        self.unrolled_coordinate(args[0], args[1], opts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapper_5x4() -> BinMapper {
        // x: 5 bins over [0, 100], y: 4 bins over [0, 100]
        BinMapper::new(&[0.0, 20.0, 40.0, 60.0, 80.0, 100.0], &[0.0, 25.0, 50.0, 75.0, 100.0])
            .unwrap()
    }

    #[test]
    fn layout_matches_diagram() {
        let m = mapper_5x4();
        let opts = IndexOptions::default();
        assert_eq!(m.linear_index(10.0, 10.0, opts), 1);
        assert_eq!(m.linear_index(90.0, 10.0, opts), 5);
        assert_eq!(m.linear_index(10.0, 30.0, opts), 6);
        assert_eq!(m.linear_index(90.0, 90.0, opts), 20);
        assert_eq!(m.linear_index(-1.0, 50.0, opts), 0);
        assert_eq!(m.linear_index(50.0, 101.0, opts), 21);
        // Underflow wins over overflow.
        assert_eq!(m.linear_index(-1.0, 101.0, opts), 0);
    }

    #[test]
    fn bins_of_index_inverts_natural_layout() {
        let m = mapper_5x4();
        assert_eq!(m.bins_of_index(1), Some((1, 1)));
        assert_eq!(m.bins_of_index(5), Some((5, 1)));
        assert_eq!(m.bins_of_index(6), Some((1, 2)));
        assert_eq!(m.bins_of_index(20), Some((5, 4)));
        assert_eq!(m.bins_of_index(0), None);
        assert_eq!(m.bins_of_index(21), None);
        for index in 1..=20 {
            let (ix, iy) = m.bins_of_index(index).unwrap();
            assert_eq!(m.linear_index_of_bins(ix, iy, false), index);
        }
    }

    #[test]
    fn transposed_layout() {
        let m = mapper_5x4();
        let opts = IndexOptions::transposed();
        assert_eq!(m.linear_index(10.0, 10.0, opts), 1);
        assert_eq!(m.linear_index(10.0, 30.0, opts), 2);
        assert_eq!(m.linear_index(30.0, 10.0, opts), 5);
        assert_eq!(m.linear_index(90.0, 90.0, opts), 20);
    }

    #[test]
    fn fold_overflow_into_last_bin() {
        let m = mapper_5x4();
        let fold = IndexOptions { transpose: false, fold_overflow: true };
        assert_eq!(m.linear_index(150.0, 10.0, fold), 5);
        assert_eq!(m.linear_index(10.0, 150.0, fold), 16);
        assert_eq!(m.linear_index(150.0, 150.0, fold), 20);
        // Underflow and NaN are not folded.
        assert_eq!(m.linear_index(-5.0, 150.0, fold), 0);
        assert_eq!(m.linear_index(f64::NAN, 10.0, fold), 21);
    }

    #[test]
    fn boundary_goes_to_upper_bin() {
        let m = mapper_5x4();
        let opts = IndexOptions::default();
        assert_eq!(m.linear_index(20.0, 0.0, opts), 2);
        assert_eq!(m.linear_index(0.0, 25.0, opts), 6);
        // The top edge of each axis is closed.
        assert_eq!(m.linear_index(100.0, 100.0, opts), 20);
    }

    #[test]
    fn degenerate_axis_is_configuration_error() {
        assert!(matches!(BinMapper::new(&[0.0], &[0.0, 1.0]), Err(Error::Configuration(_))));
        assert!(matches!(BinMapper::new(&[0.0, 1.0], &[]), Err(Error::Configuration(_))));
    }

    #[test]
    fn unrolled_coordinate_lands_in_bin() {
        let m = mapper_5x4();
        let mut h = m.unrolled_histogram("u");
        assert_eq!(h.n_bins(), 20);
        for (x, y) in [(10.0, 10.0), (90.0, 90.0), (-1.0, 0.0), (500.0, 50.0), (45.0, 55.0)] {
            h.fill(m.unrolled_coordinate(x, y, IndexOptions::default()), 1.0);
        }
        assert_eq!(h.content(1), 1.0);
        assert_eq!(h.content(20), 1.0);
        assert_eq!(h.content(0), 1.0);
        assert_eq!(h.content(21), 1.0);
        assert_eq!(h.content(13), 1.0);
    }

    #[test]
    fn lookup_flags() {
        let m = mapper_5x4();
        assert_eq!(m.lookup(&[30.0, 10.0]), 2.5);
        assert_eq!(m.lookup(&[30.0, 10.0, 1.0]), 5.5);
        assert_eq!(m.lookup(&[150.0, 10.0, 0.0, 1.0]), 5.5);
    }

    #[test]
    fn flatten_merges_flow_in_quadrature() {
        let m = mapper_5x4();
        let mut h2 = Histogram2D::new("h", m.x_axis().clone(), m.y_axis().clone());
        h2.fill(-1.0, 10.0, 3.0);
        h2.fill(10.0, -1.0, 4.0);
        h2.fill(50.0, 60.0, 2.0);
        let h1 = m.flatten(&h2, true).unwrap();
        assert_eq!(h1.name, "h_unrolled");
        assert_eq!(h1.content(0), 7.0);
        assert!((h1.error(0) - 5.0).abs() < 1e-12);
        assert_eq!(h1.content(13), 2.0);

        let no_flow = m.flatten(&h2, false).unwrap();
        assert_eq!(no_flow.content(0), 0.0);
        assert_eq!(no_flow.integral(), 2.0);
    }

    #[test]
    fn unflatten_checks_bin_count() {
        let m = mapper_5x4();
        let wrong = Histogram1D::uniform("w", 19, 1.0, 20.0).unwrap();
        assert!(matches!(m.unflatten(&wrong), Err(Error::ShapeMismatch(_))));
        let h2 = Histogram2D::uniform("h", 4, 0.0, 1.0, 5, 0.0, 1.0).unwrap();
        assert!(matches!(m.flatten(&h2, true), Err(Error::ShapeMismatch(_))));
    }

    #[test]
    fn transpose_moves_bins() {
        let m = mapper_5x4();
        let mut h = m.unrolled_histogram("u");
        h.set_content(2, 7.0); // (xbin 2, ybin 1)
        h.set_content(21, 1.0);
        let t = transpose(&h, 5, 4).unwrap();
        assert_eq!(t.content(5), 7.0); // 4*(2-1) + 1
        assert_eq!(t.content(21), 1.0);
        assert!(transpose(&h, 4, 4).is_err());
    }

    #[test]
    fn divide_by_x_width() {
        let m = BinMapper::new(&[0.0, 1.0, 3.0], &[0.0, 10.0, 30.0]).unwrap();
        let mut h = m.unrolled_histogram("u");
        for k in 1..=4 {
            h.set_content(k, 6.0);
            h.set_error(k, 2.0);
        }
        let mut t = h.clone();
        m.divide_by_bin_width(&mut h, false).unwrap();
        assert_eq!(&h.contents()[1..=4], &[6.0, 3.0, 6.0, 3.0]);
        assert!((h.error(2) - 1.0).abs() < 1e-12);

        m.divide_by_bin_width(&mut t, true).unwrap();
        assert_eq!(&t.contents()[1..=4], &[0.6, 0.3, 0.6, 0.3]);
    }

    #[test]
    fn divide_skips_zero_width() {
        let m = BinMapper::new(&[0.0, 1.0, 1.0, 2.0], &[0.0, 1.0]).unwrap();
        let mut h = m.unrolled_histogram("u");
        h.set_content(2, 5.0);
        m.divide_by_bin_width(&mut h, false).unwrap();
        assert_eq!(h.content(2), 5.0);
    }
}
