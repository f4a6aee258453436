use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use tracing::debug;

use crate::error::Result;
use crate::port::lock;
use crate::window::{ContextId, Window};

/// The embedded frame a host talks to.
///
/// Creating the frame and configuring it is the embedder's business; the
/// protocol only needs to attach it once and to know which context lives
/// inside it, so it can tell the child's messages apart from everyone else's.
pub trait EmbeddedFrame: Send + Sync {
    /// Place the frame in its container, which starts loading the child.
    fn attach(&self) -> Result<()>;

    /// The context currently loaded in the frame, if any.
    fn content_window(&self) -> Option<ContextId>;
}

type AttachHook = Box<dyn FnMut() -> Result<()> + Send>;

/// In-process [`EmbeddedFrame`].
///
/// The child context is whatever [`Window`] was last passed to
/// [`load`](Self::load). Navigating the frame is modelled by loading a
/// different window.
pub struct InlineFrame {
    content: Mutex<Option<ContextId>>,
    attach_count: AtomicUsize,
    on_attach: Mutex<Option<AttachHook>>,
}

impl InlineFrame {
    /// Create an empty frame.
    pub fn new() -> Self {
        Self {
            content: Mutex::new(None),
            attach_count: AtomicUsize::new(0),
            on_attach: Mutex::new(None),
        }
    }

    /// Create a frame with `window` already loaded.
    pub fn with_content(window: &Window) -> Self {
        let frame = Self::new();
        frame.load(window);
        frame
    }

    /// Run `hook` every time the frame is attached.
    pub fn on_attach(self, hook: impl FnMut() -> Result<()> + Send + 'static) -> Self {
        *lock(&self.on_attach) = Some(Box::new(hook));
        self
    }

    /// Load `window` into the frame, replacing the previous child.
    pub fn load(&self, window: &Window) {
        debug!(child = %window.id(), origin = window.origin(), "frame loaded");
        *lock(&self.content) = Some(window.id());
    }

    /// How many times the frame has been attached.
    pub fn attach_count(&self) -> usize {
        self.attach_count.load(Ordering::Acquire)
    }
}

impl Default for InlineFrame {
    fn default() -> Self {
        Self::new()
    }
}

impl EmbeddedFrame for InlineFrame {
    fn attach(&self) -> Result<()> {
        self.attach_count.fetch_add(1, Ordering::AcqRel);
        if let Some(hook) = lock(&self.on_attach).as_mut() {
            hook()?;
        }
        Ok(())
    }

    fn content_window(&self) -> Option<ContextId> {
        *lock(&self.content)
    }
}

impl fmt::Debug for InlineFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InlineFrame")
            .field("content", &self.content_window())
            .field("attach_count", &self.attach_count())
            .finish()
    }
}
