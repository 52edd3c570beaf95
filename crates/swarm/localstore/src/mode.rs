//! Access modes.

/// Write/read profile selecting which indexes an operation touches.
///
/// | mode | `put` | `get` |
/// |---|---|---|
/// | `Syncing` | retrieval, pull, size | plain read |
/// | `Upload` | retrieval, pull, push, size | plain read |
/// | `Request` | retrieval with access, gc, size on first store | plain read |
/// | `Synced` | push removed, gc written | read and record access |
/// | `Access` | record access of a stored chunk | read and record access |
/// | `Removal` | every index entry removed, size decremented | plain read |
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::IntoStaticStr, strum::EnumIter,
)]
#[strum(serialize_all = "lowercase")]
pub enum Mode {
    /// Chunk arriving through pull sync.
    Syncing,
    /// Chunk created locally.
    Upload,
    /// Chunk arriving as a response to a retrieve request.
    Request,
    /// A previously uploaded chunk was synced to its neighbourhood.
    Synced,
    /// Access tracking only; never stores chunk data.
    Access,
    /// Garbage collection removal.
    Removal,
}

impl Mode {
    /// True if `get` in this mode records an access.
    pub fn tracks_access(self) -> bool {
        matches!(self, Mode::Synced | Mode::Access)
    }
}
