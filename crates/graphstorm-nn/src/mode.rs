//! Train/eval mode switching.
//!
//! Inference loops run a model in evaluation mode and must hand it back in
//! the mode they found it in, also when a batch fails. [`EvalScope`] does the
//! switch on construction and the restore on drop.

use std::ops::{Deref, DerefMut};

/// A component with a training and an evaluation mode.
pub trait TrainMode {
    /// Whether the component is in training mode.
    fn is_training(&self) -> bool;

    /// Switch between training (`true`) and evaluation (`false`) mode.
    fn set_training(&mut self, training: bool);
}

/// Puts a component into evaluation mode for the lifetime of the scope.
///
/// ```rust
/// use graphstorm_nn::mode::{EvalScope, TrainMode};
///
/// struct Layer(bool);
/// impl TrainMode for Layer {
///     fn is_training(&self) -> bool { self.0 }
///     fn set_training(&mut self, training: bool) { self.0 = training; }
/// }
///
/// let mut layer = Layer(true);
/// {
///     let scoped = EvalScope::new(&mut layer);
///     assert!(!scoped.is_training());
/// }
/// assert!(layer.is_training());
/// ```
pub struct EvalScope<'a, M: TrainMode + ?Sized> {
    inner: &'a mut M,
    was_training: bool,
}

impl<'a, M: TrainMode + ?Sized> EvalScope<'a, M> {
    /// Switch `inner` to evaluation mode until the scope is dropped.
    pub fn new(inner: &'a mut M) -> Self {
        let was_training = inner.is_training();
        inner.set_training(false);
        Self {
            inner,
            was_training,
        }
    }
}

impl<M: TrainMode + ?Sized> Deref for EvalScope<'_, M> {
    type Target = M;

    fn deref(&self) -> &M {
        self.inner
    }
}

impl<M: TrainMode + ?Sized> DerefMut for EvalScope<'_, M> {
    fn deref_mut(&mut self) -> &mut M {
        self.inner
    }
}

impl<M: TrainMode + ?Sized> Drop for EvalScope<'_, M> {
    fn drop(&mut self) {
        self.inner.set_training(self.was_training);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Flag(bool);

    impl TrainMode for Flag {
        fn is_training(&self) -> bool {
            self.0
        }

        fn set_training(&mut self, training: bool) {
            self.0 = training;
        }
    }

    fn failing(flag: &mut Flag) -> Result<(), &'static str> {
        let scoped = EvalScope::new(flag);
        assert!(!scoped.is_training());
        Err("batch failed")
    }

    #[test]
    fn test_restores_after_error() {
        let mut flag = Flag(true);
        assert!(failing(&mut flag).is_err());
        assert!(flag.is_training());
    }

    #[test]
    fn test_keeps_eval_mode() {
        let mut flag = Flag(false);
        drop(EvalScope::new(&mut flag));
        assert!(!flag.is_training());
    }
}
