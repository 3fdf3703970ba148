//! Scripted backend for loader tests. Handles stay pending until a test
//! resolves them through the backend.

use panoview_common::{FetchHandle, FetchOutcome, Texture, TextureBackend};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

#[derive(Default)]
struct HandleState {
    progress: f32,
    done: bool,
    outcome: Option<FetchOutcome>,
    released: bool,
}

struct ScriptedHandle(Rc<RefCell<HandleState>>);

impl FetchHandle for ScriptedHandle {
    fn is_done(&self) -> bool {
        self.0.borrow().done
    }

    fn percent_complete(&self) -> f32 {
        self.0.borrow().progress
    }

    fn take_outcome(&mut self) -> Option<FetchOutcome> {
        let mut state = self.0.borrow_mut();
        if state.done { state.outcome.take() } else { None }
    }
}

impl Drop for ScriptedHandle {
    fn drop(&mut self) {
        self.0.borrow_mut().released = true;
    }
}

#[derive(Default)]
pub(crate) struct ScriptedBackend {
    fetches: RefCell<Vec<String>>,
    handles: RefCell<HashMap<String, Vec<Rc<RefCell<HandleState>>>>>,
    purges: usize,
}

impl ScriptedBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fetch_count(&self, key: &str) -> usize {
        self.fetches.borrow().iter().filter(|k| *k == key).count()
    }

    pub(crate) fn total_fetches(&self) -> usize {
        self.fetches.borrow().len()
    }

    pub(crate) fn purges(&self) -> usize {
        self.purges
    }

    pub(crate) fn set_progress(&self, key: &str, progress: f32) {
        self.latest(key).borrow_mut().progress = progress;
    }

    pub(crate) fn succeed(&self, key: &str, texture: Texture) {
        let handle = self.latest(key);
        let mut state = handle.borrow_mut();
        state.done = true;
        state.progress = 1.0;
        state.outcome = Some(FetchOutcome::Succeeded(texture));
    }

    pub(crate) fn fail(&self, key: &str, message: Option<&str>) {
        let handle = self.latest(key);
        let mut state = handle.borrow_mut();
        state.done = true;
        state.outcome = Some(FetchOutcome::Failed(message.map(str::to_string)));
    }

    /// True once the most recent handle for `key` has been dropped.
    pub(crate) fn released(&self, key: &str) -> bool {
        self.latest(key).borrow().released
    }

    fn latest(&self, key: &str) -> Rc<RefCell<HandleState>> {
        let handles = self.handles.borrow();
        let list = handles
            .get(key)
            .unwrap_or_else(|| panic!("no fetch issued for {key}"));
        Rc::clone(list.last().expect("handle list is never empty"))
    }
}

impl TextureBackend for ScriptedBackend {
    fn fetch(&mut self, key: &str) -> Box<dyn FetchHandle> {
        self.fetches.borrow_mut().push(key.to_string());
        let state = Rc::new(RefCell::new(HandleState::default()));
        self.handles
            .borrow_mut()
            .entry(key.to_string())
            .or_default()
            .push(Rc::clone(&state));
        Box::new(ScriptedHandle(state))
    }

    fn purge_cache(&mut self) {
        self.purges += 1;
    }
}

pub(crate) fn texture(tag: u8) -> Texture {
    Texture::solid(2, 2, [tag, tag, tag, 255]).unwrap()
}
