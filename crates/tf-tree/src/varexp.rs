//! Draw command strings.
//!
//! A draw command names what to plot and where:
//!
//! - `"pt_1 >> h(40,0,200)"`: new 1-D histogram `h`.
//! - `"eta_1:pt_1 >> h(40,0,200,10,-2.5,2.5)"`: new 2-D histogram, `y:x` order.
//! - `"pt_1 >> h"`: a histogram supplied by the caller.
//! - `"pt_2 >> +h"`: add into `h`, declared earlier in the same plan.
//!
//! The `y:x` split ignores `::` scope separators and the `:` of ternaries,
//! so `"(pt_1 > 50 ? 1 : 0) >> h(2,0,2)"` is one-dimensional.

use tf_core::{Error, Result};

use crate::histogram::{Histogram, Histogram1D, Histogram2D};

/// Inline uniform binning of a draw command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Binning {
    /// `(n, low, high)`.
    OneD(usize, f64, f64),
    /// `(nx, xlow, xhigh, ny, ylow, yhigh)`.
    TwoD(usize, f64, f64, usize, f64, f64),
}

impl Binning {
    fn parse(text: &str) -> Result<Self> {
        let parts: Vec<&str> = text.split(',').map(str::trim).collect();
        let count = |s: &str| {
            s.parse::<usize>()
                .map_err(|_| Error::Configuration(format!("invalid bin count '{s}' in '({text})'")))
        };
        let edge = |s: &str| {
            s.parse::<f64>()
                .map_err(|_| Error::Configuration(format!("invalid axis limit '{s}' in '({text})'")))
        };
        match parts.as_slice() {
            [n, lo, hi] => Ok(Binning::OneD(count(n)?, edge(lo)?, edge(hi)?)),
            [nx, xlo, xhi, ny, ylo, yhi] => Ok(Binning::TwoD(
                count(nx)?,
                edge(xlo)?,
                edge(xhi)?,
                count(ny)?,
                edge(ylo)?,
                edge(yhi)?,
            )),
            _ => Err(Error::Configuration(format!(
                "binning '({text})' needs 3 (1-D) or 6 (2-D) numbers"
            ))),
        }
    }

    /// Number of axes.
    pub fn dimension(&self) -> usize {
        match self {
            Binning::OneD(..) => 1,
            Binning::TwoD(..) => 2,
        }
    }

    /// An empty histogram with this binning.
    pub fn histogram(&self, name: &str) -> Result<Histogram> {
        Ok(match *self {
            Binning::OneD(n, lo, hi) => Histogram1D::uniform(name, n, lo, hi)?.into(),
            Binning::TwoD(nx, xlo, xhi, ny, ylo, yhi) => {
                Histogram2D::uniform(name, nx, xlo, xhi, ny, ylo, yhi)?.into()
            }
        })
    }
}

/// A parsed draw command.
#[derive(Debug, Clone, PartialEq)]
pub struct Varexp {
    /// Expression on the x axis.
    pub x: String,
    /// Expression on the y axis, for 2-D draws.
    pub y: Option<String>,
    /// Target histogram name.
    pub name: String,
    /// Inline binning, when the command creates the histogram.
    pub binning: Option<Binning>,
    /// `>> +name`: accumulate into an earlier target of the same plan.
    pub append: bool,
}

impl Varexp {
    /// Parse `"vars >> name[(binning)]"`.
    pub fn parse(text: &str) -> Result<Self> {
        let (vars, target) = text.split_once(">>").ok_or_else(|| {
            Error::Configuration(format!("draw command '{text}' has no '>> name' target"))
        })?;
        let target = target.trim();
        let (target, binning) = match target.find('(') {
            Some(open) => {
                let inner = target[open + 1..].strip_suffix(')').ok_or_else(|| {
                    Error::Configuration(format!("unclosed binning in '{text}'"))
                })?;
                (target[..open].trim(), Some(Binning::parse(inner)?))
            }
            None => (target, None),
        };
        let (name, append) = match target.strip_prefix('+') {
            Some(rest) => (rest.trim(), true),
            None => (target, false),
        };
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(Error::Configuration(format!("invalid histogram name in '{text}'")));
        }
        if append && binning.is_some() {
            return Err(Error::Configuration(format!(
                "'{text}': an appended target cannot declare binning"
            )));
        }

        let vars = vars.trim();
        let (x, y) = match split_axes(vars) {
            Some((y, x)) => (non_empty(x), Some(non_empty(y))),
            None => (non_empty(vars), None),
        };
        let dims = 1 + usize::from(y.is_some());
        if let Some(b) = &binning
            && b.dimension() != dims
        {
            return Err(Error::Configuration(format!(
                "'{text}': {dims}-D expression with {}-D binning",
                b.dimension()
            )));
        }
        Ok(Self { x, y, name: name.to_string(), binning, append })
    }

    /// Number of value expressions.
    pub fn dimension(&self) -> usize {
        1 + usize::from(self.y.is_some())
    }
}

fn non_empty(s: &str) -> String {
    let s = s.trim();
    if s.is_empty() { "1".to_string() } else { s.to_string() }
}

/// Split `"y:x"` at the first top-level `:` that is neither part of `::` nor
/// the else-branch of a ternary. Returns `(y, x)`.
fn split_axes(vars: &str) -> Option<(&str, &str)> {
    let bytes = vars.as_bytes();
    let mut depth = 0i32;
    let mut open_ternaries = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'(' | b'[' => depth += 1,
            b')' | b']' => depth -= 1,
            b':' if bytes.get(i + 1) == Some(&b':') => {
                i += 2;
                continue;
            }
            b'?' => open_ternaries += 1,
            b':' if open_ternaries > 0 => open_ternaries -= 1,
            b':' if depth == 0 => return Some((&vars[..i], &vars[i + 1..])),
            _ => {}
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_dimensional_with_binning() {
        let v = Varexp::parse("pt_1 >> h_pt(40, 0, 200)").unwrap();
        assert_eq!(v.x, "pt_1");
        assert_eq!(v.y, None);
        assert_eq!(v.name, "h_pt");
        assert_eq!(v.binning, Some(Binning::OneD(40, 0.0, 200.0)));
        assert!(!v.append);
    }

    #[test]
    fn two_dimensional_is_y_colon_x() {
        let v = Varexp::parse("eta_1:pt_1 >> h(40,0,200,10,-2.5,2.5)").unwrap();
        assert_eq!(v.x, "pt_1");
        assert_eq!(v.y.as_deref(), Some("eta_1"));
        assert_eq!(v.binning, Some(Binning::TwoD(40, 0.0, 200.0, 10, -2.5, 2.5)));
        assert_eq!(v.dimension(), 2);
    }

    #[test]
    fn scope_and_ternary_colons_do_not_split() {
        let v = Varexp::parse("(pt_1 > 50 ? 1 : 0) >> h(2,0,2)").unwrap();
        assert_eq!(v.y, None);
        assert_eq!(v.x, "(pt_1 > 50 ? 1 : 0)");
        let v = Varexp::parse("TMath::Abs(eta_1) >> h").unwrap();
        assert_eq!(v.y, None);
        let v = Varexp::parse("TMath::Abs(eta_1):pt_1 > 50 ? 1 : 0 >> h").unwrap();
        assert_eq!(v.y.as_deref(), Some("TMath::Abs(eta_1)"));
        assert_eq!(v.x, "pt_1 > 50 ? 1 : 0");
    }

    #[test]
    fn existing_and_appended_targets() {
        let v = Varexp::parse("pt_2 >> +h_pt").unwrap();
        assert!(v.append);
        assert_eq!(v.name, "h_pt");
        assert_eq!(v.binning, None);
        let v = Varexp::parse(" >> h").unwrap();
        assert_eq!(v.x, "1");
    }

    #[test]
    fn malformed_commands() {
        for bad in [
            "pt_1",
            "pt_1 >> ",
            "pt_1 >> h(40,0)",
            "pt_1 >> h(40,0,200",
            "pt_1 >> h(x,0,200)",
            "eta:pt >> h(40,0,200)",
            "pt >> +h(2,0,1)",
        ] {
            let err = Varexp::parse(bad).unwrap_err();
            assert!(matches!(err, Error::Configuration(_)), "{bad}: {err}");
        }
    }

    #[test]
    fn binning_builds_histograms() {
        let h = Binning::TwoD(2, 0.0, 1.0, 3, 0.0, 3.0).histogram("h").unwrap();
        assert_eq!(h.dimension(), 2);
        assert!(Binning::OneD(0, 0.0, 1.0).histogram("h").is_err());
    }
}
