use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use log::debug;

use crate::features::{Correspondence, FeatureMatcher, MatchRequest};

/// [`FeatureMatcher`] that reads correspondences produced offline by an
/// external detector.
///
/// For an edge between `DSC_5522.JPG` and `DSC_5521.JPG` it looks for
/// `<root>/DSC_5522_DSC_5521.txt`, falling back to the reversed name with the
/// columns swapped. Each non-comment row is `xa ya xb yb` in the coordinates
/// of the images as they were matched, i.e. downsampled by the request scale.
#[derive(Debug, Clone)]
pub struct MatchFileMatcher {
    root: PathBuf,
}

impl MatchFileMatcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn pair_file(&self, first: &Path, second: &Path) -> PathBuf {
        let stem = |p: &Path| {
            p.file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default()
        };
        self.root.join(format!("{}_{}.txt", stem(first), stem(second)))
    }
}

/// Parse whitespace separated `xa ya xb yb` rows; `#` starts a comment.
pub fn parse_match_rows(text: &str) -> anyhow::Result<Vec<Correspondence>> {
    let mut out = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        let content = line.split('#').next().unwrap_or("").trim();
        if content.is_empty() {
            continue;
        }
        let values = content
            .split_whitespace()
            .map(str::parse::<f64>)
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("line {}: not a number", line_no + 1))?;
        if values.len() != 4 {
            bail!(
                "line {}: expected 4 columns (xa ya xb yb), got {}",
                line_no + 1,
                values.len()
            );
        }
        out.push(Correspondence::new(
            [values[0], values[1]],
            [values[2], values[3]],
        ));
    }
    Ok(out)
}

impl FeatureMatcher for MatchFileMatcher {
    fn match_pair(&self, request: &MatchRequest<'_>) -> anyhow::Result<Vec<Correspondence>> {
        let forward = self.pair_file(request.image_a, request.image_b);
        let reverse = self.pair_file(request.image_b, request.image_a);

        let (path, swapped) = if forward.is_file() {
            (forward, false)
        } else if reverse.is_file() {
            (reverse, true)
        } else {
            bail!(
                "no match file for images {} and {} under {}",
                request.index_a,
                request.index_b,
                self.root.display()
            );
        };

        let text = fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        let rows = parse_match_rows(&text).with_context(|| format!("parsing {}", path.display()))?;
        debug!("{}: {} rows", path.display(), rows.len());

        let inv = 1.0 / request.scale;
        Ok(rows
            .into_iter()
            .map(|c| if swapped { c.swapped() } else { c })
            .map(|c| {
                Correspondence::new(
                    [c.a[0] * inv, c.a[1] * inv],
                    [c.b[0] * inv, c.b[1] * inv],
                )
            })
            .collect())
    }
}
