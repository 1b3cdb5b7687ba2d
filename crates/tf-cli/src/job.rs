//! YAML draw job.
//!
//! ```yaml
//! dataset: samples/dy.yaml
//! selection: "pt_1 > 25 && iso_1 < 0.15"
//! corrections: corrections.yaml
//! unroll: { x_edges: [0, 50, 100, 200], y_edges: [0, 1.5, 2.5] }
//! threads: 4
//! draws:
//!   - { varexp: "m_vis >> m_vis(30,0,300)", weight: "genweight*getPUWeight(npu)" }
//!   - { varexp: "unroll(m_vis, abs(eta_1)) >> m_vis_eta(6,1,7)" }
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tf_tree::{BinMapper, Corrections, DrawRequest};

/// Grid registered as the `unroll(x, y[, transpose[, fold]])` expression function.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UnrollGrid {
    pub x_edges: Vec<f64>,
    pub y_edges: Vec<f64>,
    #[serde(default = "default_unroll_name")]
    pub name: String,
}

fn default_unroll_name() -> String {
    "unroll".to_string()
}

fn default_threads() -> usize {
    1
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Job {
    /// Dataset manifest.
    pub dataset: PathBuf,
    #[serde(default)]
    pub selection: String,
    #[serde(default)]
    pub corrections: Option<PathBuf>,
    #[serde(default)]
    pub unroll: Option<UnrollGrid>,
    /// 1 = one sequential pass; otherwise one pass per source in parallel (0 = auto).
    #[serde(default = "default_threads")]
    pub threads: usize,
    pub draws: Vec<DrawRequest>,
}

impl Job {
    /// Read a job file, resolving relative paths against its directory.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading job {}", path.display()))?;
        let mut job: Job = serde_yaml_ng::from_str(&text)
            .with_context(|| format!("parsing job {}", path.display()))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        job.dataset = base.join(&job.dataset);
        job.corrections = job.corrections.map(|c| base.join(c));
        Ok(job)
    }

    /// Correction tables of the job, plus the unroll grid if any.
    pub fn corrections(&self) -> Result<Corrections> {
        let mut corrections = match &self.corrections {
            Some(path) => Corrections::from_file(path)
                .with_context(|| format!("loading corrections {}", path.display()))?,
            None => Corrections::new(),
        };
        if let Some(grid) = &self.unroll {
            let mapper = BinMapper::new(&grid.x_edges, &grid.y_edges)?;
            tracing::debug!(name = %grid.name, nx = mapper.nx(), ny = mapper.ny(), "unroll grid");
            corrections.insert(grid.name.clone(), mapper);
        }
        Ok(corrections)
    }
}
