//! Room and day/night selection on top of the texture loader.
//!
//! The switcher tracks which room and variant the viewer wants and which
//! texture is currently applied. A texture is applied only when its request
//! succeeds and is still the latest one; failures keep the previous texture.

use crate::loader::{LoadError, TextureLoader};
use panoview_common::{Texture, TextureBackend, Variant, room_key};
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Debug, Default)]
struct RoomState {
    room: Option<String>,
    variant: Variant,
    /// Bumped on every request; only the latest request may apply.
    generation: u64,
    applied: Option<(String, Texture)>,
    last_error: Option<LoadError>,
}

/// Selects the panorama texture for the current room and variant.
#[derive(Debug, Clone, Default)]
pub struct RoomSwitcher {
    state: Rc<RefCell<RoomState>>,
}

impl RoomSwitcher {
    pub fn new(variant: Variant) -> Self {
        Self {
            state: Rc::new(RefCell::new(RoomState {
                variant,
                ..RoomState::default()
            })),
        }
    }

    pub fn current_room(&self) -> Option<String> {
        self.state.borrow().room.clone()
    }

    pub fn variant(&self) -> Variant {
        self.state.borrow().variant
    }

    /// Key and texture currently on screen.
    pub fn applied(&self) -> Option<(String, Texture)> {
        self.state.borrow().applied.clone()
    }

    pub fn applied_key(&self) -> Option<String> {
        self.state.borrow().applied.as_ref().map(|(key, _)| key.clone())
    }

    pub fn last_error(&self) -> Option<LoadError> {
        self.state.borrow().last_error.clone()
    }

    /// Move to `room`, requesting its texture for the current variant and
    /// preloading the other variant so a later toggle is instant.
    pub fn switch_to<B: TextureBackend>(&self, loader: &mut TextureLoader<B>, room: &str) {
        if room.is_empty() {
            self.state.borrow_mut().last_error = Some(LoadError::EmptyKey);
            return;
        }
        let variant = {
            let mut state = self.state.borrow_mut();
            state.room = Some(room.to_string());
            state.variant
        };
        tracing::info!(room, %variant, "switching room");
        self.request(loader, room_key(room, variant));

        let other = room_key(room, variant.toggled());
        loader.load_async(
            &other,
            |_| {},
            |err| tracing::warn!(%err, "variant preload failed"),
        );
    }

    /// Select a variant. With a room selected, its texture is requested.
    pub fn set_variant<B: TextureBackend>(&self, loader: &mut TextureLoader<B>, variant: Variant) {
        let room = {
            let mut state = self.state.borrow_mut();
            state.variant = variant;
            state.room.clone()
        };
        if let Some(room) = room {
            tracing::info!(%room, %variant, "switching variant");
            self.request(loader, room_key(&room, variant));
        }
    }

    /// Flip between day and night. Returns the new variant.
    pub fn toggle_variant<B: TextureBackend>(&self, loader: &mut TextureLoader<B>) -> Variant {
        let variant = self.variant().toggled();
        self.set_variant(loader, variant);
        variant
    }

    fn request<B: TextureBackend>(&self, loader: &mut TextureLoader<B>, key: String) {
        let generation = {
            let mut state = self.state.borrow_mut();
            state.generation += 1;
            state.generation
        };

        let ok_state = Rc::clone(&self.state);
        let err_state = Rc::clone(&self.state);
        let applied_key = key.clone();
        loader.load_async(
            &key,
            move |texture| {
                let mut state = ok_state.borrow_mut();
                if state.generation != generation {
                    tracing::debug!(key = %applied_key, "ignoring superseded texture");
                    return;
                }
                state.applied = Some((applied_key, texture));
                state.last_error = None;
            },
            move |err| {
                let mut state = err_state.borrow_mut();
                if state.generation == generation {
                    state.last_error = Some(err);
                }
            },
        );
    }
}
