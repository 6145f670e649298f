//! The work unit contract consumed by the ordered executors.
//!
//! A work unit is an opaque piece of caller-supplied work. The executors only
//! ever call [`WorkUnit::execute`] once per submitted unit, on exactly one
//! worker thread, and optionally ask the unit to [`describe`](WorkUnit::describe)
//! itself for diagnostics. Readiness is not tracked by the unit itself: every
//! submitted unit is paired with a [`UnitState`](crate::unit_state::UnitState)
//! that the executor transitions once the action returns.
//!
//! # Contract
//!
//! `execute` must eventually return (or panic). A unit whose action never
//! returns never becomes ready, and since delivery is strictly in submission
//! order, it stalls the delivery of every unit submitted after it. The
//! executors cannot detect or recover from this.

use std::sync::Arc;

use ordflow_common::error::StdErrorBoxed;

/// Result of a work unit's action.
pub type UnitResult = std::result::Result<(), StdErrorBoxed>;

/// An independently executable piece of work.
///
/// The unit is shared between the submitter's ticket, the executing worker and
/// the eventual [`Delivery`](crate::delivery::Delivery), hence `execute` takes
/// `&self`. Units that need to record a result use interior mutability
/// (an atomic, a `Mutex`, a `OnceLock`, ...).
pub trait WorkUnit: Send + Sync + 'static {
    /// Performs the unit's action.
    ///
    /// Returning `Err` (or panicking) marks the unit as failed; it is still
    /// delivered in its submission position, carrying the failure.
    fn execute(&self) -> UnitResult;

    /// Optional human-readable description, used in log records.
    fn describe(&self) -> Option<String> {
        None
    }
}

impl<U: WorkUnit + ?Sized> WorkUnit for Box<U> {
    fn execute(&self) -> UnitResult {
        (**self).execute()
    }

    fn describe(&self) -> Option<String> {
        (**self).describe()
    }
}

impl<U: WorkUnit + ?Sized> WorkUnit for Arc<U> {
    fn execute(&self) -> UnitResult {
        (**self).execute()
    }

    fn describe(&self) -> Option<String> {
        (**self).describe()
    }
}

/// Adapts a closure into a [`WorkUnit`].
///
/// ```
/// use ordflow_workflow::work_unit::{UnitFn, WorkUnit};
///
/// let unit = UnitFn::new(|| Ok(())).with_description("noop");
/// assert!(unit.execute().is_ok());
/// assert_eq!(unit.describe().as_deref(), Some("noop"));
/// ```
pub struct UnitFn<F> {
    f: F,
    description: Option<String>,
}

impl<F> UnitFn<F>
where
    F: Fn() -> UnitResult + Send + Sync + 'static,
{
    pub fn new(f: F) -> UnitFn<F> {
        UnitFn {
            f,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> UnitFn<F> {
        self.description = Some(description.into());
        self
    }
}

impl<F> WorkUnit for UnitFn<F>
where
    F: Fn() -> UnitResult + Send + Sync + 'static,
{
    fn execute(&self) -> UnitResult {
        (self.f)()
    }

    fn describe(&self) -> Option<String> {
        self.description.clone()
    }
}

/// A boxed, type-erased work unit. Useful when a single executor runs
/// heterogeneous units.
pub type BoxedUnit = Box<dyn WorkUnit>;

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    impl WorkUnit for Named {
        fn execute(&self) -> UnitResult {
            Ok(())
        }

        fn describe(&self) -> Option<String> {
            Some(self.0.to_string())
        }
    }

    #[test]
    fn test_unit_fn() {
        let ok = UnitFn::new(|| Ok(()));
        assert!(ok.execute().is_ok());
        assert!(ok.describe().is_none());

        let failing = UnitFn::new(|| Err("bad input".into())).with_description("failing");
        assert_eq!(failing.execute().unwrap_err().to_string(), "bad input");
        assert_eq!(failing.describe().as_deref(), Some("failing"));
    }

    #[test]
    fn test_boxed_and_shared_units_forward() {
        let boxed: BoxedUnit = Box::new(Named("boxed"));
        assert!(boxed.execute().is_ok());
        assert_eq!(boxed.describe().as_deref(), Some("boxed"));

        let shared = Arc::new(Named("shared"));
        assert_eq!(shared.describe().as_deref(), Some("shared"));
    }
}
