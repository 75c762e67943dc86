//! Database options.

/// Configuration for a [`crate::Database`].
#[derive(Debug, Clone)]
pub struct Options {
    /// Per-connection decode cache capacity, counted in cached values per
    /// map (objects and metadata are cached separately). Zero disables the
    /// bound entirely.
    pub cache_capacity: usize,

    /// How many committed changesets the database retains for connection
    /// catch-up. A connection that falls further behind than this flushes
    /// its whole cache instead of replaying changesets. Zero retains
    /// unbounded history.
    pub changeset_history_limit: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            cache_capacity: 250,
            changeset_history_limit: 64,
        }
    }
}

impl Options {
    /// Creates options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the per-connection cache capacity. Zero means unbounded.
    #[must_use]
    pub const fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Sets the changeset history limit. Zero means unbounded.
    #[must_use]
    pub const fn changeset_history_limit(mut self, limit: usize) -> Self {
        self.changeset_history_limit = limit;
        self
    }
}
