use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::dataset::DataSet;
use crate::error::{GeosolveError, Result};
use crate::math::Real;

/// One matched feature on an edge `(a, b)`: pixel coordinates `(u, v)` of the
/// same ground feature in image `a` and in image `b` (full resolution).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Correspondence {
    pub a: [Real; 2],
    pub b: [Real; 2],
}

impl Correspondence {
    pub fn new(a: [Real; 2], b: [Real; 2]) -> Self {
        Self { a, b }
    }

    /// The same correspondence seen from the reversed edge.
    pub fn swapped(self) -> Self {
        Self {
            a: self.b,
            b: self.a,
        }
    }
}

/// Everything an external matcher needs to match one image pair.
#[derive(Debug, Clone)]
pub struct MatchRequest<'a> {
    pub index_a: usize,
    pub index_b: usize,
    pub image_a: &'a Path,
    pub image_b: &'a Path,
    /// Downsampling factor applied to both images before matching.
    pub scale: Real,
    /// Upper bound on the number of correspondences wanted.
    pub max_matches: usize,
}

/// External feature detection and matching collaborator.
///
/// Implementations return correspondences in full-resolution pixel
/// coordinates, best match first. Returning more than `max_matches` is
/// allowed; the graph keeps the leading ones.
pub trait FeatureMatcher {
    fn match_pair(&self, request: &MatchRequest<'_>) -> anyhow::Result<Vec<Correspondence>>;
}

/// Default cap on correspondences per edge.
pub const DEFAULT_NUMBER_OF_MATCHES: usize = 10;

/// Correspondence graph over image pairs of a [`DataSet`].
#[derive(Debug, Clone, PartialEq)]
pub struct FeaturesGraph {
    data_set: Arc<DataSet>,
    /// Cap on correspondences kept per edge.
    pub number_of_matches: usize,
    /// Downsampling factor applied before matching, in `(0, 1]`.
    pub compute_scale: Real,
    edges: Vec<(usize, usize)>,
    observations: Vec<Vec<Correspondence>>,
    computed: bool,
}

/// Persisted form of a [`FeaturesGraph`]; `observations` is parallel to `edges`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeaturesRecord {
    pub number_of_matches: usize,
    pub compute_scale: Real,
    pub computed: bool,
    pub edges: Vec<(usize, usize)>,
    pub observations: Vec<Vec<Correspondence>>,
}

impl FeaturesGraph {
    pub fn new(data_set: Arc<DataSet>) -> Self {
        Self {
            data_set,
            number_of_matches: DEFAULT_NUMBER_OF_MATCHES,
            compute_scale: 1.0,
            edges: Vec::new(),
            observations: Vec::new(),
            computed: false,
        }
    }

    pub fn data_set(&self) -> &Arc<DataSet> {
        &self.data_set
    }

    pub fn edges(&self) -> &[(usize, usize)] {
        &self.edges
    }

    /// Correspondences of edge `edge_idx`, empty until computed.
    pub fn observations(&self, edge_idx: usize) -> &[Correspondence] {
        self.observations
            .get(edge_idx)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_computed(&self) -> bool {
        self.computed
    }

    /// Register the unordered image pair `{i, j}` for matching.
    ///
    /// The pair is stored as `(min, max)`. Registering a pair that is already
    /// present is a no-op and returns `Ok(false)`. A new edge clears the
    /// `computed` flag since it has no observations yet.
    pub fn add_edge(&mut self, i: usize, j: usize) -> Result<bool> {
        if i == j {
            return Err(GeosolveError::InvalidEdge {
                i,
                j,
                reason: "an image cannot be matched with itself",
            });
        }
        let n = self.data_set.len();
        if i >= n || j >= n {
            return Err(GeosolveError::InvalidEdge {
                i,
                j,
                reason: "image index out of range",
            });
        }
        let edge = (i.min(j), i.max(j));
        if self.edges.contains(&edge) {
            debug!("edge ({}, {}) already registered", edge.0, edge.1);
            return Ok(false);
        }
        self.edges.push(edge);
        self.observations.push(Vec::new());
        self.computed = false;
        Ok(true)
    }

    /// Match every registered edge with `matcher` and store the results.
    ///
    /// Observations are committed only if every edge matched; on error the
    /// graph is left exactly as it was.
    pub fn compute(&mut self, data_dir: &Path, matcher: &dyn FeatureMatcher) -> Result<()> {
        if !(self.compute_scale > 0.0 && self.compute_scale <= 1.0) {
            return Err(GeosolveError::Configuration(format!(
                "compute_scale must be in (0, 1], got {}",
                self.compute_scale
            )));
        }

        let mut staged = Vec::with_capacity(self.edges.len());
        for &(a, b) in &self.edges {
            let image_a = data_dir.join(&self.data_set.filenames[a]);
            let image_b = data_dir.join(&self.data_set.filenames[b]);
            let request = MatchRequest {
                index_a: a,
                index_b: b,
                image_a: &image_a,
                image_b: &image_b,
                scale: self.compute_scale,
                max_matches: self.number_of_matches,
            };
            let matches = matcher
                .match_pair(&request)
                .map_err(|err| GeosolveError::Matcher {
                    a,
                    b,
                    message: format!("{err:#}"),
                })?;

            let total = matches.len();
            let mut kept: Vec<Correspondence> = matches
                .into_iter()
                .filter(|c| {
                    self.data_set.contains_pixel(&c.a) && self.data_set.contains_pixel(&c.b)
                })
                .collect();
            if kept.len() < total {
                warn!(
                    "edge ({a}, {b}): dropped {} matches outside the image bounds",
                    total - kept.len()
                );
            }
            kept.truncate(self.number_of_matches);
            staged.push(kept);
        }

        self.observations = staged;
        self.computed = true;

        for (idx, &(a, b)) in self.edges.iter().enumerate() {
            info!(
                "edge ({a}, {b}): {} matches, coverage {:.0}%",
                self.observations[idx].len(),
                100.0 * self.edge_coverage(idx, 10)
            );
        }
        Ok(())
    }

    /// Iterate over tracked correspondences as `(edge, correspondence)`,
    /// ordered by edge then by observation.
    pub fn tracks(&self) -> impl Iterator<Item = ((usize, usize), &Correspondence)> + '_ {
        self.edges
            .iter()
            .zip(&self.observations)
            .flat_map(|(edge, obs)| obs.iter().map(move |c| (*edge, c)))
    }

    /// Total number of correspondences over all edges.
    pub fn track_count(&self) -> usize {
        self.observations.iter().map(Vec::len).sum()
    }

    /// Fraction of a `grid × grid` partition of the first image of the edge
    /// that contains at least one match.
    pub fn edge_coverage(&self, edge_idx: usize, grid: usize) -> Real {
        if grid == 0 {
            return 0.0;
        }
        let cols = Real::from(self.data_set.cols.max(1));
        let rows = Real::from(self.data_set.rows.max(1));
        let cells: HashSet<(usize, usize)> = self
            .observations(edge_idx)
            .iter()
            .map(|c| {
                let cu = ((c.a[0] / cols) * grid as Real) as usize;
                let cv = ((c.a[1] / rows) * grid as Real) as usize;
                (cu.min(grid - 1), cv.min(grid - 1))
            })
            .collect();
        cells.len() as Real / (grid * grid) as Real
    }

    /// Snapshot of the graph in its persisted form.
    pub fn to_record(&self) -> FeaturesRecord {
        FeaturesRecord {
            number_of_matches: self.number_of_matches,
            compute_scale: self.compute_scale,
            computed: self.computed,
            edges: self.edges.clone(),
            observations: self.observations.clone(),
        }
    }

    /// Rebuild a graph from its persisted form, checking it against `data_set`.
    pub fn from_record(data_set: Arc<DataSet>, record: FeaturesRecord) -> Result<Self> {
        let n = data_set.len();
        let mut seen = HashSet::new();
        for &(i, j) in &record.edges {
            if i >= j || j >= n {
                return Err(GeosolveError::schema(format!(
                    "edge ({i}, {j}) is not a normalised pair of the {n} images"
                )));
            }
            if !seen.insert((i, j)) {
                return Err(GeosolveError::schema(format!("edge ({i}, {j}) listed twice")));
            }
        }
        if record.observations.len() != record.edges.len() {
            return Err(GeosolveError::schema(format!(
                "{} observation lists for {} edges",
                record.observations.len(),
                record.edges.len()
            )));
        }
        Ok(Self {
            data_set,
            number_of_matches: record.number_of_matches,
            compute_scale: record.compute_scale,
            edges: record.edges,
            observations: record.observations,
            computed: record.computed,
        })
    }
}
