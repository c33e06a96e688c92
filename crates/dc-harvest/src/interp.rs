//! Vertical (bin-by-bin linear) template interpolation.

use dc_core::{
    Error, InterpolatedShape, InterpolationEngine, MassParameter, MorphTemplate, Result, Shape,
};

/// Piecewise-linear interpolation of bin contents between neighbouring anchors.
///
/// Outside the anchor range the nearest anchor is returned unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct VerticalInterpolation;

impl InterpolationEngine for VerticalInterpolation {
    fn interpolate(
        &self,
        templates: Vec<MorphTemplate>,
        parameter: &MassParameter,
    ) -> Result<Box<dyn InterpolatedShape>> {
        Ok(Box::new(VerticalMorph::new(templates, parameter.clone())?))
    }
}

/// Anchors of one (bin, process) pair.
#[derive(Debug, Clone)]
pub struct VerticalMorph {
    parameter: MassParameter,
    anchors: Vec<MorphTemplate>,
}

impl VerticalMorph {
    pub fn new(anchors: Vec<MorphTemplate>, parameter: MassParameter) -> Result<Self> {
        let Some(first) = anchors.first() else {
            return Err(Error::Validation(format!(
                "interpolation in '{}' needs at least one template",
                parameter.name
            )));
        };
        if anchors.iter().any(|a| !a.mass.is_finite()) {
            return Err(Error::Validation("template masses must be finite".into()));
        }
        if let Some(w) = anchors.windows(2).find(|w| w[1].mass <= w[0].mass) {
            return Err(Error::Validation(format!(
                "template masses must be strictly increasing, got {} after {}",
                w[1].mass, w[0].mass
            )));
        }
        for a in &anchors {
            let mismatched = !a.shape.same_binning(&first.shape)
                || a.variations.values().any(|(u, d)| {
                    !u.same_binning(&first.shape) || !d.same_binning(&first.shape)
                });
            if mismatched {
                return Err(Error::IncompatibleBinning(format!(
                    "template at {} = {} does not share the binning of {} = {}",
                    parameter.name, a.mass, parameter.name, first.mass
                )));
            }
        }
        Ok(Self { parameter, anchors })
    }

    /// Anchor pair bracketing `value` and the weight of the upper one.
    fn bracket(&self, value: f64) -> (usize, usize, f64) {
        let n = self.anchors.len();
        let v = self.parameter.clamp(value);
        if n == 1 || v <= self.anchors[0].mass {
            return (0, 0, 0.0);
        }
        if v >= self.anchors[n - 1].mass {
            return (n - 1, n - 1, 0.0);
        }
        let hi = self.anchors.partition_point(|a| a.mass <= v);
        let lo = hi - 1;
        let (m0, m1) = (self.anchors[lo].mass, self.anchors[hi].mass);
        (lo, hi, (v - m0) / (m1 - m0))
    }
}

fn blend(a: &Shape, b: &Shape, t: f64) -> Result<Shape> {
    if t == 0.0 {
        return Ok(a.clone());
    }
    let lerp = |x: f64, y: f64| (1.0 - t) * x + t * y;
    let contents = a.contents().iter().zip(b.contents()).map(|(&x, &y)| lerp(x, y)).collect();
    let errors = a.errors().iter().zip(b.errors()).map(|(&x, &y)| lerp(x, y)).collect();
    let mut out = Shape::new(a.edges().to_vec(), contents, errors)?;
    out.set_underflow(lerp(a.underflow(), b.underflow()), 0.0);
    out.set_overflow(lerp(a.overflow(), b.overflow()), 0.0);
    Ok(out)
}

impl InterpolatedShape for VerticalMorph {
    fn parameter(&self) -> &MassParameter {
        &self.parameter
    }

    fn anchors(&self) -> &[MorphTemplate] {
        &self.anchors
    }

    fn method(&self) -> &str {
        "vertical"
    }

    fn evaluate(&self, value: f64) -> Result<Shape> {
        let (lo, hi, t) = self.bracket(value);
        blend(&self.anchors[lo].shape, &self.anchors[hi].shape, t)
    }

    fn evaluate_variation(&self, name: &str, value: f64) -> Result<(Shape, Shape)> {
        let (lo, hi, t) = self.bracket(value);
        let get = |k: usize| {
            self.anchors[k].variations.get(name).ok_or_else(|| {
                Error::MissingShape(format!(
                    "variation '{}' missing at {} = {}",
                    name, self.parameter.name, self.anchors[k].mass
                ))
            })
        };
        let ((u0, d0), (u1, d1)) = (get(lo)?, get(hi)?);
        Ok((blend(u0, u1, t)?, blend(d0, d1, t)?))
    }
}
