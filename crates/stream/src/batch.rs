//! Completion counting for `preload_many`.

use crate::loader::LoadError;
use std::cell::RefCell;
use std::rc::Rc;

type AllCompleteFn = Box<dyn FnOnce()>;
type AnyErrorFn = Box<dyn FnMut(&str, LoadError)>;

/// Shared state of one preload batch. Every key resolves exactly once, success
/// or failure, and the last resolution fires the completion callback.
pub(crate) struct PreloadBatch {
    remaining: usize,
    failed: usize,
    on_all_complete: Option<AllCompleteFn>,
    on_any_error: AnyErrorFn,
}

impl PreloadBatch {
    pub(crate) fn new(
        total: usize,
        on_all_complete: AllCompleteFn,
        on_any_error: AnyErrorFn,
    ) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self {
            remaining: total,
            failed: 0,
            on_all_complete: Some(on_all_complete),
            on_any_error,
        }))
    }

    pub(crate) fn succeed(batch: &Rc<RefCell<Self>>) {
        Self::resolve(batch);
    }

    pub(crate) fn fail(batch: &Rc<RefCell<Self>>, key: &str, error: LoadError) {
        {
            let mut state = batch.borrow_mut();
            state.failed += 1;
            (state.on_any_error)(key, error);
        }
        Self::resolve(batch);
    }

    fn resolve(batch: &Rc<RefCell<Self>>) {
        let done = {
            let mut state = batch.borrow_mut();
            state.remaining = state.remaining.saturating_sub(1);
            if state.remaining == 0 {
                tracing::debug!(failed = state.failed, "preload batch complete");
                state.on_all_complete.take()
            } else {
                None
            }
        };
        if let Some(on_all_complete) = done {
            on_all_complete();
        }
    }
}
