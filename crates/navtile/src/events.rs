//! Notifications about changes of a [`NavigationMesh`](crate::NavigationMesh).

use std::{fmt, sync::mpsc};

use glam::{IVec2, Vec3};

/// Something changed in the tiles of a navigation mesh.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NavigationEvent {
    /// The mesh was allocated or rebuilt from scratch.
    MeshRebuilt,
    /// A tile column was built or loaded.
    TileAdded(IVec2),
    /// Every layer of a tile column was removed.
    TileRemoved(IVec2),
    /// All tiles were removed.
    AllTilesRemoved,
    /// A tile was rebuilt. The bounds are in navigation mesh space.
    AreaRebuilt {
        /// Minimum corner of the rebuilt tile.
        bounds_min: Vec3,
        /// Maximum corner of the rebuilt tile.
        bounds_max: Vec3,
    },
    /// An obstacle was registered. The position is in world space.
    ObstacleAdded {
        /// Bottom center of the obstacle.
        position: Vec3,
        /// Radius of the obstacle.
        radius: f32,
        /// Height of the obstacle.
        height: f32,
    },
    /// An obstacle was unregistered. The position is in world space.
    ObstacleRemoved {
        /// Bottom center of the obstacle.
        position: Vec3,
        /// Radius of the obstacle.
        radius: f32,
        /// Height of the obstacle.
        height: f32,
    },
}

type Callback = Box<dyn FnMut(&NavigationEvent) + Send>;

/// Delivers events to callbacks and channels.
#[derive(Default)]
pub(crate) struct EventSender {
    callbacks: Vec<Callback>,
    channels: Vec<mpsc::Sender<NavigationEvent>>,
}

impl EventSender {
    pub(crate) fn subscribe(&mut self, callback: impl FnMut(&NavigationEvent) + Send + 'static) {
        self.callbacks.push(Box::new(callback));
    }

    pub(crate) fn channel(&mut self) -> mpsc::Receiver<NavigationEvent> {
        let (sender, receiver) = mpsc::channel();
        self.channels.push(sender);
        receiver
    }

    pub(crate) fn send(&mut self, event: NavigationEvent) {
        tracing::trace!(?event, "Navigation event");
        for callback in &mut self.callbacks {
            callback(&event);
        }
        // Receivers that were dropped are forgotten.
        self.channels.retain(|sender| sender.send(event).is_ok());
    }
}

impl fmt::Debug for EventSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSender")
            .field("callbacks", &self.callbacks.len())
            .field("channels", &self.channels.len())
            .finish()
    }
}
