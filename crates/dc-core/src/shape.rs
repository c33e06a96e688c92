//! Histogram-like shapes owned by processes, observations and systematics.
//!
//! A [`Shape`] is an ordered sequence of bins (lower edge, content, absolute
//! uncertainty) with explicit underflow/overflow. Contents are absolute yields;
//! the normalization of a shape is its [`Shape::integral`].

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Absolute tolerance used when matching bin edges.
pub const EDGE_TOLERANCE: f64 = 1e-6;

/// A 1D binned template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ShapeRepr", into = "ShapeRepr")]
pub struct Shape {
    edges: Vec<f64>,
    contents: Vec<f64>,
    errors: Vec<f64>,
    underflow: f64,
    overflow: f64,
    underflow_error: f64,
    overflow_error: f64,
}

/// On-disk representation. `errors` may be omitted, in which case Poisson
/// uncertainties `sqrt(|content|)` are assumed.
#[derive(Serialize, Deserialize)]
struct ShapeRepr {
    edges: Vec<f64>,
    contents: Vec<f64>,
    #[serde(default)]
    errors: Option<Vec<f64>>,
    #[serde(default)]
    underflow: f64,
    #[serde(default)]
    overflow: f64,
    #[serde(default)]
    underflow_error: f64,
    #[serde(default)]
    overflow_error: f64,
}

impl TryFrom<ShapeRepr> for Shape {
    type Error = Error;

    fn try_from(r: ShapeRepr) -> Result<Self> {
        let mut shape = match r.errors {
            Some(errors) => Shape::new(r.edges, r.contents, errors)?,
            None => Shape::from_contents(r.edges, r.contents)?,
        };
        shape.set_underflow(r.underflow, r.underflow_error);
        shape.set_overflow(r.overflow, r.overflow_error);
        Ok(shape)
    }
}

impl From<Shape> for ShapeRepr {
    fn from(s: Shape) -> Self {
        ShapeRepr {
            edges: s.edges,
            contents: s.contents,
            errors: Some(s.errors),
            underflow: s.underflow,
            overflow: s.overflow,
            underflow_error: s.underflow_error,
            overflow_error: s.overflow_error,
        }
    }
}

impl Shape {
    /// Create a shape from edges (length n+1), contents and absolute errors (length n).
    pub fn new(edges: Vec<f64>, contents: Vec<f64>, errors: Vec<f64>) -> Result<Self> {
        validate_edges(&edges)?;
        let n_bins = edges.len() - 1;
        if contents.len() != n_bins {
            return Err(Error::Validation(format!(
                "shape has {} edges but {} contents (expected {})",
                edges.len(),
                contents.len(),
                n_bins
            )));
        }
        if errors.len() != n_bins {
            return Err(Error::Validation(format!(
                "shape has {} contents but {} errors",
                n_bins,
                errors.len()
            )));
        }
        if contents.iter().chain(errors.iter()).any(|v| !v.is_finite()) {
            return Err(Error::Validation("shape contents and errors must be finite".into()));
        }
        Ok(Self {
            edges,
            contents,
            errors: errors.into_iter().map(f64::abs).collect(),
            underflow: 0.0,
            overflow: 0.0,
            underflow_error: 0.0,
            overflow_error: 0.0,
        })
    }

    /// Create a shape with Poisson-like uncertainties `sqrt(|content|)`.
    pub fn from_contents(edges: Vec<f64>, contents: Vec<f64>) -> Result<Self> {
        let errors = contents.iter().map(|c| c.abs().sqrt()).collect();
        Self::new(edges, contents, errors)
    }

    /// A single-bin shape on `[0, 1)`.
    pub fn single_bin(content: f64, error: f64) -> Self {
        Self {
            edges: vec![0.0, 1.0],
            contents: vec![content],
            errors: vec![error.abs()],
            underflow: 0.0,
            overflow: 0.0,
            underflow_error: 0.0,
            overflow_error: 0.0,
        }
    }

    /// An all-zero shape with the same binning as `self`.
    pub fn zeros_like(&self) -> Self {
        let n = self.n_bins();
        Self {
            edges: self.edges.clone(),
            contents: vec![0.0; n],
            errors: vec![0.0; n],
            underflow: 0.0,
            overflow: 0.0,
            underflow_error: 0.0,
            overflow_error: 0.0,
        }
    }

    /// Number of bins (excluding under/overflow).
    pub fn n_bins(&self) -> usize {
        self.contents.len()
    }

    /// Bin edges (length = n_bins + 1).
    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    /// Bin contents.
    pub fn contents(&self) -> &[f64] {
        &self.contents
    }

    /// Absolute per-bin uncertainties.
    pub fn errors(&self) -> &[f64] {
        &self.errors
    }

    pub fn underflow(&self) -> f64 {
        self.underflow
    }

    pub fn overflow(&self) -> f64 {
        self.overflow
    }

    pub fn set_underflow(&mut self, content: f64, error: f64) {
        self.underflow = content;
        self.underflow_error = error.abs();
    }

    pub fn set_overflow(&mut self, content: f64, error: f64) {
        self.overflow = content;
        self.overflow_error = error.abs();
    }

    /// Set the content of bin `i`. Panics if `i` is out of range.
    pub fn set_content(&mut self, i: usize, value: f64) {
        self.contents[i] = value;
    }

    /// Set the absolute uncertainty of bin `i`. Panics if `i` is out of range.
    pub fn set_error(&mut self, i: usize, value: f64) {
        self.errors[i] = value.abs();
    }

    /// Relative uncertainty of bin `i`, `None` when the content is not positive.
    pub fn relative_error(&self, i: usize) -> Option<f64> {
        let c = self.contents[i];
        (c > 0.0).then(|| self.errors[i] / c)
    }

    /// Centre of bin `i`.
    pub fn bin_center(&self, i: usize) -> f64 {
        0.5 * (self.edges[i] + self.edges[i + 1])
    }

    /// Sum of in-range contents.
    pub fn integral(&self) -> f64 {
        self.contents.iter().sum()
    }

    /// Sum of contents including underflow and overflow.
    pub fn integral_with_flows(&self) -> f64 {
        self.underflow + self.integral() + self.overflow
    }

    /// Whether both shapes have the same bin edges (within [`EDGE_TOLERANCE`]).
    pub fn same_binning(&self, other: &Shape) -> bool {
        self.edges.len() == other.edges.len()
            && self.edges.iter().zip(&other.edges).all(|(a, b)| (a - b).abs() <= EDGE_TOLERANCE)
    }

    /// Bin-wise sum; uncertainties combine in quadrature.
    pub fn add(&mut self, other: &Shape) -> Result<()> {
        if !self.same_binning(other) {
            return Err(Error::IncompatibleBinning(format!(
                "cannot add shapes with edges {:?} and {:?}",
                self.edges, other.edges
            )));
        }
        for i in 0..self.n_bins() {
            self.contents[i] += other.contents[i];
            self.errors[i] = self.errors[i].hypot(other.errors[i]);
        }
        self.underflow += other.underflow;
        self.overflow += other.overflow;
        self.underflow_error = self.underflow_error.hypot(other.underflow_error);
        self.overflow_error = self.overflow_error.hypot(other.overflow_error);
        Ok(())
    }

    /// Multiply contents and errors (including flows) by `factor`.
    pub fn scale(&mut self, factor: f64) {
        for c in &mut self.contents {
            *c *= factor;
        }
        for e in &mut self.errors {
            *e *= factor.abs();
        }
        self.underflow *= factor;
        self.overflow *= factor;
        self.underflow_error *= factor.abs();
        self.overflow_error *= factor.abs();
    }

    /// Collapse to a single bin whose content is the full integral including
    /// under/overflow. The uncertainty is the quadrature sum of all bin errors,
    /// so per-bin statistical nuisances can still be built on the result.
    pub fn to_single_bin(&self) -> Shape {
        let err2: f64 = self.errors.iter().map(|e| e * e).sum::<f64>()
            + self.underflow_error * self.underflow_error
            + self.overflow_error * self.overflow_error;
        Shape::single_bin(self.integral_with_flows(), err2.sqrt())
    }

    /// Redistribute contents onto `new_edges`.
    ///
    /// Every new edge must coincide with an existing edge. Each original bin is
    /// assigned to the new bin containing its centre; bins outside the new range
    /// are moved into under/overflow. Errors combine in quadrature.
    pub fn rebinned(&self, new_edges: &[f64]) -> Result<Shape> {
        validate_edges(new_edges)?;
        for &edge in new_edges {
            if !self.edges.iter().any(|e| (e - edge).abs() <= EDGE_TOLERANCE) {
                return Err(Error::IncompatibleBinning(format!(
                    "edge {} does not align with existing edges {:?}",
                    edge, self.edges
                )));
            }
        }

        let n_new = new_edges.len() - 1;
        let mut contents = vec![0.0; n_new];
        let mut err2 = vec![0.0; n_new];
        let mut under = (self.underflow, self.underflow_error * self.underflow_error);
        let mut over = (self.overflow, self.overflow_error * self.overflow_error);

        for i in 0..self.n_bins() {
            let center = self.bin_center(i);
            let (c, e2) = (self.contents[i], self.errors[i] * self.errors[i]);
            if center < new_edges[0] {
                under.0 += c;
                under.1 += e2;
            } else if center >= new_edges[n_new] {
                over.0 += c;
                over.1 += e2;
            } else {
                // partition_point gives the first edge strictly above the centre.
                let j = new_edges.partition_point(|&e| e <= center) - 1;
                contents[j] += c;
                err2[j] += e2;
            }
        }

        Ok(Shape {
            edges: new_edges.to_vec(),
            contents,
            errors: err2.into_iter().map(f64::sqrt).collect(),
            underflow: under.0,
            overflow: over.0,
            underflow_error: under.1.sqrt(),
            overflow_error: over.1.sqrt(),
        })
    }
}

fn validate_edges(edges: &[f64]) -> Result<()> {
    if edges.len() < 2 {
        return Err(Error::Validation(format!(
            "bin edges must define at least one bin, got {:?}",
            edges
        )));
    }
    if edges.iter().any(|e| !e.is_finite()) || edges.windows(2).any(|w| w[1] <= w[0]) {
        return Err(Error::Validation(format!(
            "bin edges must be finite and strictly increasing, got {:?}",
            edges
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample() -> Shape {
        Shape::new(
            vec![0.0, 1.0, 2.0, 3.0, 4.0],
            vec![1.0, 2.0, 3.0, 4.0],
            vec![1.0, 1.0, 1.0, 1.0],
        )
        .unwrap()
    }

    #[test]
    fn rejects_bad_edges() {
        assert!(Shape::new(vec![0.0], vec![], vec![]).is_err());
        assert!(Shape::new(vec![0.0, 2.0, 1.0], vec![1.0, 1.0], vec![0.0, 0.0]).is_err());
        assert!(Shape::new(vec![0.0, 1.0], vec![1.0, 2.0], vec![0.0, 0.0]).is_err());
    }

    #[test]
    fn poisson_errors_when_missing() {
        let s: Shape =
            serde_json::from_str(r#"{"edges":[0,1,2],"contents":[4.0,9.0]}"#).unwrap();
        assert_eq!(s.errors(), &[2.0, 3.0]);
    }

    #[test]
    fn add_combines_in_quadrature() {
        let mut a = sample();
        let b = sample();
        a.add(&b).unwrap();
        assert_eq!(a.contents(), &[2.0, 4.0, 6.0, 8.0]);
        assert_relative_eq!(a.errors()[0], 2.0_f64.sqrt());
    }

    #[test]
    fn add_rejects_mismatched_binning() {
        let mut a = sample();
        let b = Shape::single_bin(1.0, 1.0);
        assert!(matches!(a.add(&b), Err(Error::IncompatibleBinning(_))));
    }

    #[test]
    fn single_bin_includes_flows_and_is_idempotent() {
        let mut s = sample();
        s.set_underflow(0.5, 0.0);
        s.set_overflow(1.5, 0.0);
        let one = s.to_single_bin();
        assert_eq!(one.n_bins(), 1);
        assert_relative_eq!(one.contents()[0], 12.0);
        assert_relative_eq!(one.errors()[0], 2.0);
        let twice = one.to_single_bin();
        assert_eq!(one, twice);
    }

    #[test]
    fn rebin_preserves_integral() {
        let s = sample();
        let r = s.rebinned(&[0.0, 2.0, 4.0]).unwrap();
        assert_eq!(r.contents(), &[3.0, 7.0]);
        assert_relative_eq!(r.integral(), s.integral());
        assert_relative_eq!(r.errors()[0], 2.0_f64.sqrt());
    }

    #[test]
    fn rebin_moves_outside_bins_to_flows() {
        let s = sample();
        let r = s.rebinned(&[1.0, 3.0]).unwrap();
        assert_eq!(r.contents(), &[5.0]);
        assert_eq!(r.underflow(), 1.0);
        assert_eq!(r.overflow(), 4.0);
        assert_relative_eq!(r.integral_with_flows(), s.integral());
    }

    #[test]
    fn rebin_rejects_unaligned_edge() {
        let s = sample();
        let err = s.rebinned(&[0.0, 1.5, 4.0]).unwrap_err();
        assert!(matches!(err, Error::IncompatibleBinning(_)));
        assert!(err.to_string().contains("1.5"));
    }

    #[test]
    fn scale_scales_errors_by_magnitude() {
        let mut s = sample();
        s.scale(-2.0);
        assert_eq!(s.contents()[1], -4.0);
        assert_eq!(s.errors()[1], 2.0);
    }
}
