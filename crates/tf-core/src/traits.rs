//! Collaborator traits.
//!
//! The event loop treats scale factors (pileup, tau ID, lepton efficiency,
//! Z pT, top pT, ...) as opaque scalar functions of per-row inputs. Tables
//! implementing [`ScalarLookup`] are loaded once per analysis run and handed
//! to expression binding by reference.

use std::ops::RangeInclusive;

/// A pure scalar function of a handful of per-row inputs.
pub trait ScalarLookup: Send + Sync {
    /// Accepted number of arguments.
    fn arity(&self) -> RangeInclusive<usize>;

    /// Evaluate the lookup. `args.len()` is always within [`arity`](Self::arity).
    fn lookup(&self, args: &[f64]) -> f64;
}

impl<F> ScalarLookup for F
where
    F: Fn(f64) -> f64 + Send + Sync,
{
    fn arity(&self) -> RangeInclusive<usize> {
        1..=1
    }

    fn lookup(&self, args: &[f64]) -> f64 {
        self(args[0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ConstantSf(f64);

    impl ScalarLookup for ConstantSf {
        fn arity(&self) -> RangeInclusive<usize> {
            0..=2
        }

        fn lookup(&self, _args: &[f64]) -> f64 {
            self.0
        }
    }

    #[test]
    fn test_trait_object() {
        let sf: Box<dyn ScalarLookup> = Box::new(ConstantSf(0.93));
        assert!(sf.arity().contains(&2));
        assert_eq!(sf.lookup(&[1.0, 2.0]), 0.93);
    }

    #[test]
    fn test_closure_lookup() {
        let double = |x: f64| 2.0 * x;
        let sf: &dyn ScalarLookup = &double;
        assert_eq!(sf.arity(), 1..=1);
        assert_eq!(sf.lookup(&[21.0]), 42.0);
    }
}
