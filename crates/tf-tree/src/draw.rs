//! Draw plans: named draw commands turned into histograms.
//!
//! A [`DrawPlan`] resolves a list of [`DrawRequest`]s once (parsing draw
//! commands, creating or cloning target histograms) and can then be run over
//! any dataset with the same schema. Every request fills a private histogram
//! that is merged into its output by addition after the scan, so several
//! requests may accumulate into one output (`>> +name`) and independent
//! partitions can be filled in parallel.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tf_core::{DrawSummary, Error, Result};

use crate::corrections::Corrections;
use crate::dataset::Dataset;
use crate::histogram::{Axis, Histogram, Histogram1D, Histogram2D};
use crate::multidraw::{MultiDraw, Target};
use crate::varexp::Varexp;

/// One entry of a draw job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DrawRequest {
    /// Draw command, e.g. `"m_vis >> h_mvis(30,0,300)"`.
    pub varexp: String,
    /// Per-histogram weight expression (empty means `1`).
    #[serde(default)]
    pub weight: String,
    /// Variable x binning for a target without inline binning.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edges: Option<Vec<f64>>,
    /// Variable y binning, for 2-D targets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y_edges: Option<Vec<f64>>,
}

impl DrawRequest {
    /// Request with a draw command and a weight.
    pub fn new(varexp: impl Into<String>, weight: impl Into<String>) -> Self {
        Self { varexp: varexp.into(), weight: weight.into(), ..Self::default() }
    }

    /// Set variable x (and optionally y) bin edges.
    pub fn with_edges(mut self, edges: Vec<f64>, y_edges: Option<Vec<f64>>) -> Self {
        self.edges = Some(edges);
        self.y_edges = y_edges;
        self
    }
}

#[derive(Debug, Clone)]
struct PlannedDraw {
    x: String,
    y: Option<String>,
    weight: String,
    output: usize,
}

/// Histograms and scan statistics of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawOutput {
    /// Scan statistics.
    pub summary: DrawSummary,
    /// Output histograms in declaration order.
    pub histograms: Vec<Histogram>,
}

impl DrawOutput {
    /// Output histogram named `name`.
    pub fn get(&self, name: &str) -> Option<&Histogram> {
        self.histograms.iter().find(|h| h.name() == name)
    }
}

/// A resolved list of draws sharing one selection.
#[derive(Debug, Clone)]
pub struct DrawPlan {
    selection: String,
    draws: Vec<PlannedDraw>,
    outputs: Vec<Histogram>,
}

impl DrawPlan {
    /// Resolve `requests`. Targets without inline binning or `edges` are
    /// cloned (emptied) from `templates` by name.
    pub fn new(
        selection: impl Into<String>,
        requests: &[DrawRequest],
        templates: &[Histogram],
    ) -> Result<Self> {
        let mut draws = Vec::with_capacity(requests.len());
        let mut outputs: Vec<Histogram> = Vec::new();
        for req in requests {
            let v = Varexp::parse(&req.varexp)?;
            let existing = outputs.iter().position(|h| h.name() == v.name);
            let output = match (v.append, existing) {
                (true, Some(i)) => i,
                (true, None) => {
                    return Err(Error::Configuration(format!(
                        "'{}': no earlier histogram named '{}'",
                        req.varexp, v.name
                    )));
                }
                (false, Some(_)) => {
                    return Err(Error::Configuration(format!(
                        "histogram '{}' declared twice; use '>> +{}' to add to it",
                        v.name, v.name
                    )));
                }
                (false, None) => {
                    outputs.push(target_histogram(&v, req, templates)?);
                    outputs.len() - 1
                }
            };
            if outputs[output].dimension() != v.dimension() {
                return Err(Error::Configuration(format!(
                    "'{}': {}-D expression for {}-D histogram '{}'",
                    req.varexp,
                    v.dimension(),
                    outputs[output].dimension(),
                    v.name
                )));
            }
            draws.push(PlannedDraw { x: v.x, y: v.y, weight: req.weight.clone(), output });
        }
        Ok(Self { selection: selection.into(), draws, outputs })
    }

    /// Shared selection.
    pub fn selection(&self) -> &str {
        &self.selection
    }

    /// Number of draws.
    pub fn len(&self) -> usize {
        self.draws.len()
    }

    /// `true` if the plan has no draws.
    pub fn is_empty(&self) -> bool {
        self.draws.is_empty()
    }

    /// Names of the output histograms.
    pub fn output_names(&self) -> impl Iterator<Item = &str> {
        self.outputs.iter().map(Histogram::name)
    }

    /// Fill one private histogram per draw in a single pass.
    fn fill(&self, dataset: &Dataset, corrections: &Corrections) -> Result<(Vec<Histogram>, DrawSummary)> {
        let mut work: Vec<Histogram> =
            self.draws.iter().map(|d| self.outputs[d.output].clone()).collect();
        let mut md = MultiDraw::new(dataset, corrections, &self.selection)?;
        for (d, h) in self.draws.iter().zip(work.iter_mut()) {
            md.add_target(&d.x, d.y.as_deref(), &d.weight, Target::from(h))?;
        }
        let summary = md.run()?;
        Ok((work, summary))
    }

    fn merge(&self, outputs: &mut [Histogram], work: &[Histogram]) -> Result<()> {
        for (d, h) in self.draws.iter().zip(work) {
            outputs[d.output].add(h)?;
        }
        Ok(())
    }

    /// Fill every output in one sequential pass over `dataset`.
    pub fn run(&self, dataset: &Dataset, corrections: &Corrections) -> Result<DrawOutput> {
        let (work, summary) = self.fill(dataset, corrections)?;
        let mut histograms = self.outputs.clone();
        self.merge(&mut histograms, &work)?;
        Ok(DrawOutput { summary, histograms })
    }

    /// Fill every output with one pass per source, in parallel, then merge the
    /// partial histograms in source order.
    pub fn run_partitioned(&self, dataset: &Dataset, corrections: &Corrections) -> Result<DrawOutput> {
        let parts = dataset.split_sources();
        let partials: Vec<(Vec<Histogram>, DrawSummary)> =
            parts.par_iter().map(|part| self.fill(part, corrections)).collect::<Result<_>>()?;

        let mut histograms = self.outputs.clone();
        let mut summary = DrawSummary::default();
        for (work, part_summary) in &partials {
            self.merge(&mut histograms, work)?;
            summary = summary.merge(*part_summary);
        }
        tracing::debug!(partitions = parts.len(), entries = summary.entries, "partitions merged");
        Ok(DrawOutput { summary, histograms })
    }
}

fn target_histogram(v: &Varexp, req: &DrawRequest, templates: &[Histogram]) -> Result<Histogram> {
    if let Some(binning) = &v.binning {
        return binning.histogram(&v.name);
    }
    if let Some(edges) = &req.edges {
        let x = Axis::new(edges.clone())?;
        return Ok(match (&v.y, &req.y_edges) {
            (None, _) => Histogram1D::new(v.name.as_str(), x).into(),
            (Some(_), Some(y_edges)) => {
                Histogram2D::new(v.name.as_str(), x, Axis::new(y_edges.clone())?).into()
            }
            (Some(_), None) => {
                return Err(Error::Configuration(format!(
                    "'{}': 2-D draw needs y_edges",
                    req.varexp
                )));
            }
        });
    }
    let template = templates.iter().find(|h| h.name() == v.name).ok_or_else(|| {
        Error::Configuration(format!(
            "'{}': histogram '{}' has no binning and no template",
            req.varexp, v.name
        ))
    })?;
    let mut h = template.clone();
    h.reset();
    Ok(h)
}
