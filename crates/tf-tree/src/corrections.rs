//! Correction lookup context.
//!
//! A [`Corrections`] registry maps function names usable in expressions to
//! [`ScalarLookup`] tables. It is built once per analysis run and passed by
//! reference to expression binding, so no table state outlives the run.
//!
//! Built-in tables:
//! - [`Binned1D`]: value per bin of one variable (tau ID SF by decay mode).
//! - [`Binned2D`]: value per cell of two variables (Z pT weights, lepton SFs).
//! - [`RatioTable`]: normalized data/MC profile ratio (pileup reweighting).
//! - [`ExpWeight`]: geometric mean of `exp(a + b·x)` factors (top pT).

use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tf_core::{Error, Result, ScalarLookup};

use crate::histogram::{Axis, Histogram1D};

/// Name → lookup registry.
#[derive(Clone, Default)]
pub struct Corrections {
    tables: BTreeMap<String, Arc<dyn ScalarLookup>>,
}

impl std::fmt::Debug for Corrections {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.tables.keys()).finish()
    }
}

impl Corrections {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `lookup` under `name`, replacing any previous entry.
    pub fn insert(&mut self, name: impl Into<String>, lookup: impl ScalarLookup + 'static) {
        self.tables.insert(name.into(), Arc::new(lookup));
    }

    /// Register a shared lookup.
    pub fn insert_shared(&mut self, name: impl Into<String>, lookup: Arc<dyn ScalarLookup>) {
        self.tables.insert(name.into(), lookup);
    }

    /// Lookup registered as `name`.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn ScalarLookup>> {
        self.tables.get(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    /// Number of registered lookups.
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Load tables from a YAML (or JSON) file mapping names to table specs.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let specs: BTreeMap<String, TableSpec> = serde_yaml_ng::from_slice(&bytes)?;
        let corrections = Self::from_specs(specs)?;
        tracing::debug!(path = %path.display(), tables = corrections.len(), "corrections loaded");
        Ok(corrections)
    }

    /// Build tables from parsed specs.
    pub fn from_specs(specs: BTreeMap<String, TableSpec>) -> Result<Self> {
        let mut out = Self::new();
        for (name, spec) in specs {
            let table = spec
                .build()
                .map_err(|e| Error::Configuration(format!("correction '{name}': {e}")))?;
            out.insert_shared(name, table);
        }
        Ok(out)
    }
}

/// Serialized form of a correction table, tagged by `kind`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TableSpec {
    /// See [`Binned1D`].
    Binned1d {
        /// Bin edges.
        edges: Vec<f64>,
        /// One value per bin.
        values: Vec<f64>,
        /// Optional one error per bin.
        #[serde(default)]
        errors: Option<Vec<f64>>,
        /// Clamp out-of-range inputs to the edge bins.
        #[serde(default)]
        clamp: bool,
        /// Value outside the table when not clamping.
        #[serde(default = "unit")]
        default: f64,
    },
    /// See [`Binned2D`].
    Binned2d {
        /// Bin edges of the first argument.
        x_edges: Vec<f64>,
        /// Bin edges of the second argument.
        y_edges: Vec<f64>,
        /// Row-major values, first argument fastest.
        values: Vec<f64>,
        /// Optional errors, same layout as `values`.
        #[serde(default)]
        errors: Option<Vec<f64>>,
        /// Clamp out-of-range inputs to the edge bins.
        #[serde(default)]
        clamp: bool,
        /// Value outside the table when not clamping.
        #[serde(default = "unit")]
        default: f64,
    },
    /// See [`RatioTable`].
    Ratio {
        /// Bin edges.
        edges: Vec<f64>,
        /// Data profile.
        numerator: Vec<f64>,
        /// Simulation profile.
        denominator: Vec<f64>,
        /// Upper bound on the ratio.
        #[serde(default)]
        max_ratio: Option<f64>,
    },
    /// See [`ExpWeight`].
    Exp {
        /// Constant term.
        a: f64,
        /// Slope.
        b: f64,
        /// Inputs are clamped to this value.
        #[serde(default)]
        max_x: Option<f64>,
    },
}

fn unit() -> f64 {
    1.0
}

impl TableSpec {
    /// Validate and build the lookup.
    pub fn build(self) -> Result<Arc<dyn ScalarLookup>> {
        Ok(match self {
            TableSpec::Binned1d { edges, values, errors, clamp, default } => {
                let mut t = Binned1D::new(edges, values)?.clamped(clamp).with_default(default);
                if let Some(errors) = errors {
                    t = t.with_errors(errors)?;
                }
                Arc::new(t)
            }
            TableSpec::Binned2d { x_edges, y_edges, values, errors, clamp, default } => {
                let mut t =
                    Binned2D::new(x_edges, y_edges, values)?.clamped(clamp).with_default(default);
                if let Some(errors) = errors {
                    t = t.with_errors(errors)?;
                }
                Arc::new(t)
            }
            TableSpec::Ratio { edges, numerator, denominator, max_ratio } => {
                let mut t = RatioTable::new(edges, numerator, denominator)?;
                t.max_ratio = max_ratio;
                Arc::new(t)
            }
            TableSpec::Exp { a, b, max_x } => Arc::new(ExpWeight { a, b, max_x }),
        })
    }
}

fn check_len(what: &str, got: usize, expected: usize) -> Result<()> {
    if got != expected {
        return Err(Error::Configuration(format!("{what}: {got} values for {expected} bins")));
    }
    Ok(())
}

/// Resolve `bin` of `axis` to a 0-based in-range index.
fn table_bin(axis: &Axis, value: f64, clamp: bool) -> Option<usize> {
    let n = axis.n_bins();
    let bin = axis.find_bin(value);
    if clamp && !value.is_nan() {
        return Some(bin.clamp(1, n) - 1);
    }
    (1..=n).contains(&bin).then(|| bin - 1)
}

// ── Binned tables ──────────────────────────────────────────────

/// Value per bin of one input: `f(x[, shift])` returns `value + shift·error`.
#[derive(Debug, Clone)]
pub struct Binned1D {
    axis: Axis,
    values: Vec<f64>,
    errors: Vec<f64>,
    clamp: bool,
    default: f64,
}

impl Binned1D {
    /// Table over `edges` with one value per bin.
    pub fn new(edges: Vec<f64>, values: Vec<f64>) -> Result<Self> {
        let axis = Axis::new(edges)?;
        check_len("values", values.len(), axis.n_bins())?;
        let errors = vec![0.0; values.len()];
        Ok(Self { axis, values, errors, clamp: false, default: 1.0 })
    }

    /// Attach per-bin errors used by the `shift` argument.
    pub fn with_errors(mut self, errors: Vec<f64>) -> Result<Self> {
        check_len("errors", errors.len(), self.axis.n_bins())?;
        self.errors = errors;
        Ok(self)
    }

    /// Clamp out-of-range inputs into the first or last bin.
    pub fn clamped(mut self, clamp: bool) -> Self {
        self.clamp = clamp;
        self
    }

    /// Value returned outside the table.
    pub fn with_default(mut self, default: f64) -> Self {
        self.default = default;
        self
    }
}

impl ScalarLookup for Binned1D {
    fn arity(&self) -> RangeInclusive<usize> {
        1..=2
    }

    fn lookup(&self, args: &[f64]) -> f64 {
        let shift = args.get(1).copied().unwrap_or(0.0);
        match table_bin(&self.axis, args[0], self.clamp) {
            Some(i) => self.values[i] + shift * self.errors[i],
            None => self.default,
        }
    }
}

/// Value per cell of two inputs: `f(x, y[, shift])`.
#[derive(Debug, Clone)]
pub struct Binned2D {
    x: Axis,
    y: Axis,
    values: Vec<f64>,
    errors: Vec<f64>,
    clamp: bool,
    default: f64,
}

impl Binned2D {
    /// Table over `x_edges × y_edges`; `values` is row-major with x fastest.
    pub fn new(x_edges: Vec<f64>, y_edges: Vec<f64>, values: Vec<f64>) -> Result<Self> {
        let x = Axis::new(x_edges)?;
        let y = Axis::new(y_edges)?;
        check_len("values", values.len(), x.n_bins() * y.n_bins())?;
        let errors = vec![0.0; values.len()];
        Ok(Self { x, y, values, errors, clamp: false, default: 1.0 })
    }

    /// Attach per-cell errors used by the `shift` argument.
    pub fn with_errors(mut self, errors: Vec<f64>) -> Result<Self> {
        check_len("errors", errors.len(), self.values.len())?;
        self.errors = errors;
        Ok(self)
    }

    /// Clamp out-of-range inputs into the edge cells.
    pub fn clamped(mut self, clamp: bool) -> Self {
        self.clamp = clamp;
        self
    }

    /// Value returned outside the table.
    pub fn with_default(mut self, default: f64) -> Self {
        self.default = default;
        self
    }
}

impl ScalarLookup for Binned2D {
    fn arity(&self) -> RangeInclusive<usize> {
        2..=3
    }

    fn lookup(&self, args: &[f64]) -> f64 {
        let shift = args.get(2).copied().unwrap_or(0.0);
        let ix = table_bin(&self.x, args[0], self.clamp);
        let iy = table_bin(&self.y, args[1], self.clamp);
        match (ix, iy) {
            (Some(ix), Some(iy)) => {
                let i = iy * self.x.n_bins() + ix;
                self.values[i] + shift * self.errors[i]
            }
            _ => self.default,
        }
    }
}

// ── Profile ratio ──────────────────────────────────────────────

/// Ratio of two binned profiles, each normalized to unit integral.
///
/// Returns `1.0` outside the table or where the denominator is not positive.
#[derive(Debug, Clone)]
pub struct RatioTable {
    axis: Axis,
    ratio: Vec<f64>,
    /// Upper bound applied to every ratio.
    pub max_ratio: Option<f64>,
}

impl RatioTable {
    /// Build from data and simulation profiles over `edges`.
    pub fn new(edges: Vec<f64>, numerator: Vec<f64>, denominator: Vec<f64>) -> Result<Self> {
        let axis = Axis::new(edges)?;
        check_len("numerator", numerator.len(), axis.n_bins())?;
        check_len("denominator", denominator.len(), axis.n_bins())?;
        let num = normalized(numerator);
        let den = normalized(denominator);
        let ratio = num.iter().zip(&den).map(|(&n, &d)| if d > 0.0 { n / d } else { 1.0 }).collect();
        Ok(Self { axis, ratio, max_ratio: None })
    }

    /// Build from in-range contents of two histograms with identical binning.
    pub fn from_histograms(data: &Histogram1D, mc: &Histogram1D) -> Result<Self> {
        if data.axis() != mc.axis() {
            return Err(Error::ShapeMismatch(format!(
                "pileup profiles '{}' and '{}' have different binning",
                data.name, mc.name
            )));
        }
        let n = data.n_bins();
        let inner = |h: &Histogram1D| (1..=n).map(|i| h.content(i)).collect::<Vec<_>>();
        Self::new(data.axis().edges().to_vec(), inner(data), inner(mc))
    }

    /// Cap ratios at `max`.
    pub fn with_max_ratio(mut self, max: f64) -> Self {
        self.max_ratio = Some(max);
        self
    }
}

fn normalized(mut v: Vec<f64>) -> Vec<f64> {
    let sum: f64 = v.iter().sum();
    if sum > 0.0 {
        v.iter_mut().for_each(|x| *x /= sum);
    }
    v
}

impl ScalarLookup for RatioTable {
    fn arity(&self) -> RangeInclusive<usize> {
        1..=1
    }

    fn lookup(&self, args: &[f64]) -> f64 {
        let Some(i) = table_bin(&self.axis, args[0], false) else {
            return 1.0;
        };
        let r = self.ratio[i];
        match self.max_ratio {
            Some(max) => r.min(max),
            None => r,
        }
    }
}

// ── Exponential weight ─────────────────────────────────────────

/// `f(x1[, x2])`: geometric mean of `exp(a + b·min(xᵢ, max_x))`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExpWeight {
    /// Constant term.
    pub a: f64,
    /// Slope.
    pub b: f64,
    /// Inputs are clamped to this value.
    pub max_x: Option<f64>,
}

impl ScalarLookup for ExpWeight {
    fn arity(&self) -> RangeInclusive<usize> {
        1..=2
    }

    fn lookup(&self, args: &[f64]) -> f64 {
        let log_sum: f64 = args
            .iter()
            .map(|&x| self.a + self.b * self.max_x.map_or(x, |m| x.min(m)))
            .sum();
        (log_sum / args.len() as f64).exp()
    }
}
